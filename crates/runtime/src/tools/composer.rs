//! Combine several tool hosts behind one [`ToolHost`].

use super::{ToolContext, ToolError, ToolHost, ToolSpec};
use async_trait::async_trait;
use futures::future::join_all;
use policy::Policy;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
struct Entry {
    label: String,
    host: Arc<dyn ToolHost>,
}

/// Merges the catalogs of its hosts in registration order.
///
/// A tool name offered by more than one host belongs to the first. Hosts
/// whose catalog fails to load are skipped for that call.
#[derive(Clone, Default)]
pub struct ToolComposer {
    hosts: Vec<Entry>,
    policy: Policy,
}

impl ToolComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a host. Earlier hosts win name conflicts.
    pub fn register(&mut self, label: impl Into<String>, host: Arc<dyn ToolHost>) {
        self.hosts.push(Entry {
            label: label.into(),
            host,
        });
    }

    pub fn with_host(mut self, label: impl Into<String>, host: Arc<dyn ToolHost>) -> Self {
        self.register(label, host);
        self
    }

    /// Apply a capability policy to this composer.
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// A view over the same hosts that only exposes tools `policy` permits,
    /// on top of this composer's own policy.
    pub fn scoped(&self, policy: &Policy) -> Self {
        Self {
            hosts: self.hosts.clone(),
            policy: self.policy.narrow(policy),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(|entry| entry.label.as_str())
    }

    /// Query every host concurrently. Failing hosts become `None`.
    async fn catalogs(&self) -> Vec<Option<Vec<ToolSpec>>> {
        let results = join_all(self.hosts.iter().map(|entry| entry.host.list_tools())).await;
        results
            .into_iter()
            .zip(&self.hosts)
            .map(|(result, entry)| match result {
                Ok(tools) => Some(tools),
                Err(e) => {
                    warn!(host = %entry.label, code = %e.code(), error = %e, "skipping tool host");
                    None
                }
            })
            .collect()
    }

    /// Index of the host owning `name`, considering the policy.
    async fn owner(&self, name: &str) -> Option<usize> {
        self.catalogs()
            .await
            .into_iter()
            .enumerate()
            .find_map(|(index, catalog)| {
                catalog?
                    .iter()
                    .find(|tool| tool.name == name)
                    .map(|tool| (index, self.policy.permits(tool.capability_tags())))
            })
            .and_then(|(index, permitted)| permitted.then_some(index))
    }
}

impl std::fmt::Debug for ToolComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolComposer")
            .field("hosts", &self.labels().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl ToolHost for ToolComposer {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for (catalog, entry) in self.catalogs().await.into_iter().zip(&self.hosts) {
            for tool in catalog.into_iter().flatten() {
                if !seen.insert(tool.name.clone()) {
                    debug!(host = %entry.label, tool = %tool.name, "dropping shadowed tool");
                    continue;
                }
                if self.policy.permits(tool.capability_tags()) {
                    merged.push(tool);
                }
            }
        }
        Ok(merged)
    }

    async fn call_tool(
        &self,
        name: &str,
        args: &str,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let Some(index) = self.owner(name).await else {
            return Err(ToolError::unknown_tool(name));
        };
        let entry = &self.hosts[index];
        debug!(host = %entry.label, tool = name, session_id = %ctx.session_id, "routing tool call");
        entry.host.call_tool(name, args, ctx).await
    }
}
