use crate::error::ChannelError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Kind of change reported by a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The value at `path` was replaced (`null` means deleted).
    Put,
    /// Several children under `path` were replaced at once.
    Patch,
}

/// One change notification, with `path` relative to the subscribed location.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEvent {
    pub kind: EventKind,
    pub path: String,
    pub data: Value,
}

impl TreeEvent {
    pub fn put(path: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EventKind::Put,
            path: path.into(),
            data,
        }
    }

    pub fn patch(path: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EventKind::Patch,
            path: path.into(),
            data,
        }
    }

    /// Path segments below the subscription root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }
}

/// Hierarchical key-value store with push subscriptions.
///
/// Paths are slash separated and absolute from the database root; callers
/// build them from [`crate::session::Session`] so writes stay inside one
/// session namespace.
#[async_trait]
pub trait RemoteTree: Send + Sync {
    async fn get(&self, path: &str) -> Result<Value, ChannelError>;

    async fn set(&self, path: &str, value: &Value) -> Result<(), ChannelError>;

    /// Replace only the named children of `path`.
    async fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<(), ChannelError>;

    async fn delete(&self, path: &str) -> Result<(), ChannelError>;

    /// Stream changes under `path` into `tx` until the subscription ends.
    ///
    /// `Ok(())` means the stream closed (or `tx` was dropped) and a resubscribe
    /// may succeed; `Err` carries why it stopped.
    async fn subscribe(
        &self,
        path: &str,
        tx: tokio::sync::mpsc::Sender<TreeEvent>,
    ) -> Result<(), ChannelError>;
}
