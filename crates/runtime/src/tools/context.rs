//! Per-invocation tool context.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback receiving streamed partial output: `(delta, details)`.
pub type UpdateSink = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Where a tool's result should be forwarded instead of the calling turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub session_id: String,
    pub tool_call_id: String,
}

/// Context accompanying a single tool call.
///
/// Cheap to clone. Optional fields may be absent; hosts check before use.
#[derive(Clone)]
pub struct ToolContext {
    pub cancel: CancellationToken,
    pub session_id: String,
    pub tool_call_id: Option<String>,
    pub turn_id: Option<String>,
    pub response_id: Option<String>,
    pub forward_to: Option<ForwardTarget>,
    on_update: Option<UpdateSink>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            session_id: session_id.into(),
            tool_call_id: None,
            turn_id: None,
            response_id: None,
            forward_to: None,
            on_update: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = Some(id.into());
        self
    }

    pub fn with_turn_id(mut self, id: impl Into<String>) -> Self {
        self.turn_id = Some(id.into());
        self
    }

    pub fn with_response_id(mut self, id: impl Into<String>) -> Self {
        self.response_id = Some(id.into());
        self
    }

    pub fn with_forward_to(mut self, target: ForwardTarget) -> Self {
        self.forward_to = Some(target);
        self
    }

    pub fn with_on_update<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.on_update = Some(Arc::new(sink));
        self
    }

    /// Whether a streaming sink is attached.
    pub fn streams_updates(&self) -> bool {
        self.on_update.is_some()
    }

    /// Push a partial result to the sink, if any.
    pub fn update(&self, delta: &str, details: &Value) {
        if let Some(sink) = &self.on_update {
            sink(delta, details);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("tool_call_id", &self.tool_call_id)
            .field("turn_id", &self.turn_id)
            .field("response_id", &self.response_id)
            .field("forward_to", &self.forward_to)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn update_without_sink_is_noop() {
        let ctx = ToolContext::new("s1");
        assert!(!ctx.streams_updates());
        ctx.update("ignored", &Value::Null);
    }

    #[test]
    fn update_reaches_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = ToolContext::new("s1")
            .with_tool_call_id("call-1")
            .with_on_update(move |delta, _| sink.lock().unwrap().push(delta.to_string()));

        ctx.update("a", &Value::Null);
        ctx.clone().update("b", &Value::Null);

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(ctx.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn clones_share_cancellation() {
        let ctx = ToolContext::new("s1");
        let other = ctx.clone();
        ctx.cancel.cancel();
        assert!(other.is_cancelled());
    }
}
