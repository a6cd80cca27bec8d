//! Capability-based tool scoping.
//!
//! Every tool advertises a set of capability tags. A [`Policy`] decides
//! which of those tags a caller may see; tools outside the policy are left
//! out of the catalog entirely.

mod capability;
mod error;
mod policy;

pub use capability::Capability;
pub use error::{Error, Result};
pub use policy::{Decision, Policy};
