use crate::context::AgentContext;
use crate::error::HandlerError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// How a consumed command entry is removed from the remote tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearPolicy {
    /// Delete the entry after the handler ran.
    Delete,
    /// Write `{val: false}` before the handler runs, delete afterwards.
    ResetThenDelete,
}

/// One entry of the command vocabulary.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    fn clear_policy(&self) -> ClearPolicy {
        ClearPolicy::Delete
    }

    async fn execute(&self, ctx: &AgentContext, value: &Value) -> Result<(), HandlerError>;
}

/// Command name → handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the handler for `handler.name()`.
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.insert(handler.name(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
