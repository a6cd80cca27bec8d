//! Policy configuration and enforcement.

use crate::{Capability, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Capability scope loaded from TOML.
///
/// ```toml
/// allow = ["fs_read", "mcp:github"]
/// deny = ["exec"]
/// ```
///
/// A tool is permitted when at least one of its capabilities is allowed and
/// none is denied. Omitting `allow` allows every capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Capabilities that are explicitly allowed. `None` allows all.
    #[serde(default)]
    pub allow: Option<BTreeSet<Capability>>,

    /// Capabilities that are explicitly denied (overrides allow).
    #[serde(default)]
    pub deny: BTreeSet<Capability>,
}

/// Result of a capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl Policy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Everything is visible.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Only tools carrying one of `capabilities` are visible.
    pub fn allow_only<I, C>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        Self {
            allow: Some(capabilities.into_iter().map(Into::into).collect()),
            deny: BTreeSet::new(),
        }
    }

    /// Add a denied capability.
    pub fn deny(mut self, capability: impl Into<Capability>) -> Self {
        self.deny.insert(capability.into());
        self
    }

    /// Intersect with another policy: a tool must pass both.
    pub fn narrow(&self, other: &Policy) -> Policy {
        let allow = match (&self.allow, &other.allow) {
            (None, None) => None,
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            (Some(a), Some(b)) => Some(a.intersection(b).cloned().collect()),
        };
        Policy {
            allow,
            deny: self.deny.union(&other.deny).cloned().collect(),
        }
    }

    /// Check a tool's capability set.
    pub fn check<'a, I>(&self, capabilities: I) -> Decision
    where
        I: IntoIterator<Item = &'a str>,
    {
        let tags: Vec<&str> = capabilities.into_iter().collect();

        // Check explicit denials first
        if let Some(denied) = tags.iter().find(|tag| self.deny.contains(**tag)) {
            return Decision::Deny {
                reason: format!("{denied} is denied by policy"),
            };
        }

        let Some(allow) = &self.allow else {
            return Decision::Allow;
        };

        if tags.iter().any(|tag| allow.contains(*tag)) {
            Decision::Allow
        } else {
            Decision::Deny {
                reason: format!("none of [{}] is in the allowlist", tags.join(", ")),
            }
        }
    }

    /// Shorthand for `check(..).is_allowed()`.
    pub fn permits<'a, I>(&self, capabilities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.check(capabilities).is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissive_allows_untagged_tools() {
        let policy = Policy::permissive();
        assert!(policy.permits([]));
        assert!(policy.permits(["exec"]));
    }

    #[test]
    fn test_allowlist_requires_intersection() {
        let policy = Policy::allow_only(["fs_read"]);
        assert!(policy.permits(["fs_read", "fs_write"]));
        assert!(!policy.permits(["exec"]));
        assert!(!policy.permits([]));
    }

    #[test]
    fn test_deny_overrides_allow() {
        let policy = Policy::allow_only(["fs_read", "exec"]).deny("exec");
        let decision = policy.check(["exec"]);
        assert_eq!(
            decision,
            Decision::Deny {
                reason: "exec is denied by policy".into()
            }
        );
        assert!(!policy.permits(["fs_read", "exec"]));
    }

    #[test]
    fn test_narrow_intersects() {
        let config = Policy::allow_only(["fs_read", "exec"]);
        let caller = Policy::allow_only(["exec", "mcp"]).deny("net_http");
        let scoped = config.narrow(&caller);
        assert!(scoped.permits(["exec"]));
        assert!(!scoped.permits(["fs_read"]));
        assert!(!scoped.permits(["mcp"]));
        assert!(!scoped.permits(["exec", "net_http"]));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
allow = ["fs_read", "mcp:github"]
deny = ["exec"]
"#;
        let policy = Policy::parse(toml).unwrap();

        // Allowed
        assert!(policy.permits(["fs_read"]));
        assert!(policy.permits(["mcp", "mcp:github"]));

        // Denied
        assert!(!policy.permits(["fs_read", "exec"]));
        assert!(!policy.permits(["mcp", "mcp:slack"]));
    }

    #[test]
    fn test_parse_empty_is_permissive() {
        let policy = Policy::parse("").unwrap();
        assert_eq!(policy, Policy::permissive());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(Policy::parse("allow = 3"), Err(Error::Parse(_))));
    }
}
