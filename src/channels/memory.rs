//! In-process [`RemoteTree`] with the same event semantics as the realtime
//! database: writes to or above a subscribed path are pushed as `put` events
//! relative to the subscription, empty objects disappear, `null` deletes.

use crate::channels::traits::{RemoteTree, TreeEvent};
use crate::error::ChannelError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};

/// A mutation applied to the tree, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeOp {
    Set(String, Value),
    Update(String, Map<String, Value>),
    Delete(String),
}

impl TreeOp {
    pub fn path(&self) -> &str {
        match self {
            Self::Set(path, _) | Self::Update(path, _) | Self::Delete(path) => path,
        }
    }
}

struct Subscriber {
    id: u64,
    prefix: String,
    tx: mpsc::Sender<TreeEvent>,
    end: Option<oneshot::Sender<Option<String>>>,
}

#[derive(Default)]
struct State {
    root: Value,
    ops: Vec<TreeOp>,
    subscribers: Vec<Subscriber>,
    failing_subscribes: Vec<String>,
    write_failure: Option<String>,
    subscribe_count: u64,
}

#[derive(Default)]
pub struct InMemoryTree {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl InMemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without recording an op or notifying subscribers.
    pub fn seed(&self, path: &str, value: Value) {
        let mut state = self.state.lock();
        write_at(&mut state.root, &split(path), value);
    }

    pub fn value_at(&self, path: &str) -> Value {
        read_at(&self.state.lock().root, &split(path))
    }

    pub fn ops(&self) -> Vec<TreeOp> {
        self.state.lock().ops.clone()
    }

    pub fn ops_under(&self, prefix: &str) -> Vec<TreeOp> {
        let prefix = normalize(prefix);
        self.ops()
            .into_iter()
            .filter(|op| is_same_or_below(&normalize(op.path()), &prefix))
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Total number of `subscribe` calls, including failed ones.
    pub fn subscribe_count(&self) -> u64 {
        self.state.lock().subscribe_count
    }

    /// Make the next `subscribe` call fail with a fatal cancel.
    pub fn fail_next_subscribe(&self, message: impl Into<String>) {
        self.state.lock().failing_subscribes.push(message.into());
    }

    /// Make every write fail until cleared with `None`.
    pub fn set_write_failure(&self, message: Option<String>) {
        self.state.lock().write_failure = message;
    }

    /// End all live subscriptions; `Some(reason)` ends them with a fatal cancel,
    /// `None` as a clean close.
    pub fn sever_subscriptions(&self, reason: Option<String>) {
        let subscribers = std::mem::take(&mut self.state.lock().subscribers);
        for mut sub in subscribers {
            if let Some(end) = sub.end.take() {
                let _ = end.send(reason.clone());
            }
        }
    }

    async fn apply(&self, op: TreeOp) -> Result<(), ChannelError> {
        let deliveries = {
            let mut state = self.state.lock();
            if let Some(message) = state.write_failure.clone() {
                return Err(ChannelError::Status {
                    op: "write",
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    body: message,
                });
            }
            let path = normalize(op.path());
            let segments = split(&path);
            match &op {
                TreeOp::Set(_, value) => write_at(&mut state.root, &segments, value.clone()),
                TreeOp::Update(_, fields) => {
                    for (key, value) in fields {
                        let mut child = segments.clone();
                        child.extend(split(key));
                        write_at(&mut state.root, &child, value.clone());
                    }
                }
                TreeOp::Delete(_) => write_at(&mut state.root, &segments, Value::Null),
            }
            state.ops.push(op);
            state.subscribers.retain(|sub| !sub.tx.is_closed());
            state
                .subscribers
                .iter()
                .filter_map(|sub| {
                    event_for(&state.root, &sub.prefix, &path).map(|ev| (sub.tx.clone(), ev))
                })
                .collect::<Vec<_>>()
        };
        for (tx, event) in deliveries {
            let _ = tx.send(event).await;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTree for InMemoryTree {
    async fn get(&self, path: &str) -> Result<Value, ChannelError> {
        Ok(self.value_at(path))
    }

    async fn set(&self, path: &str, value: &Value) -> Result<(), ChannelError> {
        self.apply(TreeOp::Set(normalize(path), value.clone())).await
    }

    async fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<(), ChannelError> {
        self.apply(TreeOp::Update(normalize(path), fields.clone()))
            .await
    }

    async fn delete(&self, path: &str) -> Result<(), ChannelError> {
        self.apply(TreeOp::Delete(normalize(path))).await
    }

    async fn subscribe(&self, path: &str, tx: mpsc::Sender<TreeEvent>) -> Result<(), ChannelError> {
        let prefix = normalize(path);
        let (end_tx, end_rx) = oneshot::channel();
        let snapshot = {
            let mut state = self.state.lock();
            state.subscribe_count += 1;
            if !state.failing_subscribes.is_empty() {
                let message = state.failing_subscribes.remove(0);
                return Err(ChannelError::Cancelled(message));
            }
            state.subscribers.push(Subscriber {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                prefix: prefix.clone(),
                tx: tx.clone(),
                end: Some(end_tx),
            });
            read_at(&state.root, &split(&prefix))
        };
        if tx.send(TreeEvent::put("/", snapshot)).await.is_err() {
            return Ok(());
        }

        tokio::select! {
            reason = end_rx => match reason {
                Ok(Some(reason)) => Err(ChannelError::Cancelled(reason)),
                _ => Ok(()),
            },
            () = tx.closed() => {
                let mut state = self.state.lock();
                state.subscribers.retain(|sub| !sub.tx.same_channel(&tx));
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for InMemoryTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryTree")
            .field("root", &state.root)
            .field(
                "subscribers",
                &state.subscribers.iter().map(|s| s.id).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn normalize(path: &str) -> String {
    split(path).join("/")
}

fn split(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn is_same_or_below(path: &str, prefix: &str) -> bool {
    prefix.is_empty() || path == prefix || path.starts_with(&format!("{prefix}/"))
}

/// The event a subscriber at `prefix` sees after a write at `changed`.
fn event_for(root: &Value, prefix: &str, changed: &str) -> Option<TreeEvent> {
    if is_same_or_below(changed, prefix) {
        let relative = changed[prefix.len()..].trim_start_matches('/');
        return Some(TreeEvent::put(
            format!("/{relative}"),
            read_at(root, &split(changed)),
        ));
    }
    if is_same_or_below(prefix, changed) {
        return Some(TreeEvent::put("/", read_at(root, &split(prefix))));
    }
    None
}

fn read_at(root: &Value, segments: &[String]) -> Value {
    let mut node = root;
    for segment in segments {
        match node.get(segment) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

fn write_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = prune(value);
        return;
    };
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.clone()).or_insert(Value::Null);
        write_at(child, rest, value);
        if is_empty(child) {
            map.remove(first);
        }
    }
    if is_empty(node) {
        *node = Value::Null;
    }
}

fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !is_empty(v))
                .collect();
            if pruned.is_empty() {
                Value::Null
            } else {
                Value::Object(pruned)
            }
        }
        other => other,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_update_delete_follow_tree_semantics() {
        let tree = InMemoryTree::new();
        tree.set("users/u1/command/lock", &json!(true)).await.unwrap();
        let mut fields = Map::new();
        fields.insert("online".into(), json!(true));
        fields.insert("pc_name".into(), json!("desk"));
        tree.update("users/u1/status", &fields).await.unwrap();

        assert_eq!(tree.value_at("users/u1/command/lock"), json!(true));
        assert_eq!(
            tree.value_at("users/u1/status"),
            json!({"online": true, "pc_name": "desk"})
        );

        tree.delete("users/u1/command/lock").await.unwrap();
        // Empty parents vanish.
        assert_eq!(tree.value_at("users/u1/command"), Value::Null);
        assert_eq!(tree.ops().len(), 3);
        assert_eq!(tree.ops_under("users/u1/command").len(), 2);
    }

    #[tokio::test]
    async fn subscriber_sees_snapshot_then_relative_puts() {
        let tree = std::sync::Arc::new(InMemoryTree::new());
        tree.seed("users/u1/command/popup", json!("hello"));
        let (tx, mut rx) = mpsc::channel(8);
        let sub = {
            let tree = tree.clone();
            tokio::spawn(async move { tree.subscribe("users/u1/command", tx).await })
        };

        assert_eq!(
            rx.recv().await.unwrap(),
            TreeEvent::put("/", json!({"popup": "hello"}))
        );
        tree.set("users/u1/command/lock", &json!({"val": true, "ts": 1}))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            TreeEvent::put("/lock", json!({"val": true, "ts": 1}))
        );
        // Writes elsewhere are not delivered.
        tree.set("users/u1/status/online", &json!(true)).await.unwrap();
        tree.delete("users/u1/command/lock").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), TreeEvent::put("/lock", Value::Null));

        tree.sever_subscriptions(None);
        assert!(sub.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn severing_with_reason_is_fatal() {
        let tree = std::sync::Arc::new(InMemoryTree::new());
        let (tx, mut rx) = mpsc::channel(8);
        let sub = {
            let tree = tree.clone();
            tokio::spawn(async move { tree.subscribe("users/u1/command", tx).await })
        };
        rx.recv().await.unwrap();
        tree.sever_subscriptions(Some("revoked".into()));
        let err = sub.await.unwrap().unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn injected_failures_are_reported() {
        let tree = InMemoryTree::new();
        tree.fail_next_subscribe("down");
        let (tx, _rx) = mpsc::channel(8);
        assert!(tree.subscribe("a", tx).await.is_err());
        assert_eq!(tree.subscribe_count(), 1);

        tree.set_write_failure(Some("offline".into()));
        assert!(tree.set("a", &json!(1)).await.is_err());
        tree.set_write_failure(None);
        assert!(tree.set("a", &json!(1)).await.is_ok());
    }
}
