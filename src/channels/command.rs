use crate::channels::traits::{EventKind, RemoteTree, TreeEvent};
use crate::error::ChannelError;
use crate::session::Session;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const RAW_EVENT_BUFFER: usize = 64;
const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Live subscription to `users/{session}/command`, feeding the dispatcher.
pub struct CommandChannel {
    tree: Arc<dyn RemoteTree>,
    path: String,
    max_attempts: u32,
    resubscribe_delay: Duration,
}

impl CommandChannel {
    pub fn new(tree: Arc<dyn RemoteTree>, session: &Session, max_attempts: u32) -> Self {
        Self {
            tree,
            path: session.command_root(),
            max_attempts,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Keep the subscription alive, resubscribing after transient drops.
    ///
    /// Returns only when the subscription cannot be restored (fatal signal or
    /// too many consecutive failures) or when `tx` is closed.
    pub async fn run(&self, tx: mpsc::Sender<TreeEvent>) -> Result<(), ChannelError> {
        let mut failures: u32 = 0;
        loop {
            let (raw_tx, mut raw_rx) = mpsc::channel(RAW_EVENT_BUFFER);
            let subscription = self.tree.subscribe(&self.path, raw_tx);
            let forward = async {
                let mut received = 0_usize;
                while let Some(event) = raw_rx.recv().await {
                    received += 1;
                    for event in fan_out(event) {
                        if tx.send(event).await.is_err() {
                            return (received, false);
                        }
                    }
                }
                (received, true)
            };
            let (result, (received, downstream_open)) = tokio::join!(subscription, forward);

            if !downstream_open || tx.is_closed() {
                return Ok(());
            }
            if received > 0 {
                failures = 0;
            }
            let last = match result {
                Err(err) if err.is_fatal() => {
                    tracing::warn!("Command subscription on {} ended: {err}", self.path);
                    return Err(err);
                }
                Err(err) => err.to_string(),
                Ok(()) => ChannelError::Closed.to_string(),
            };

            failures += 1;
            if failures > self.max_attempts {
                return Err(ChannelError::Exhausted {
                    attempts: self.max_attempts,
                    last,
                });
            }
            let delay = self.resubscribe_delay * 2_u32.saturating_pow(failures - 1);
            tracing::info!(
                "Command subscription dropped ({last}); resubscribing in {}ms (attempt {failures}/{})",
                delay.as_millis(),
                self.max_attempts
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Split a root snapshot into one event per command so a backlog goes through
/// the same per-command rules as live writes.
pub fn fan_out(event: TreeEvent) -> Vec<TreeEvent> {
    if event.kind == EventKind::Put && event.segments().next().is_none() {
        if let Value::Object(children) = event.data {
            return children
                .into_iter()
                .map(|(name, data)| TreeEvent::put(format!("/{name}"), data))
                .collect();
        }
    }
    vec![event]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::InMemoryTree;
    use serde_json::json;

    fn session() -> Session {
        Session::new("u1").unwrap()
    }

    #[test]
    fn root_snapshot_fans_out_per_command() {
        let events = fan_out(TreeEvent::put(
            "/",
            json!({"lock": true, "popup": {"val": "hi", "ts": 10}}),
        ));
        assert_eq!(
            events,
            vec![
                TreeEvent::put("/lock", json!(true)),
                TreeEvent::put("/popup", json!({"val": "hi", "ts": 10})),
            ]
        );
    }

    #[test]
    fn non_root_and_empty_events_pass_through() {
        let single = TreeEvent::put("/lock", json!(true));
        assert_eq!(fan_out(single.clone()), vec![single]);
        let empty = TreeEvent::put("/", Value::Null);
        assert_eq!(fan_out(empty.clone()), vec![empty]);
        let patch = TreeEvent::patch("/", json!({"lock": true}));
        assert_eq!(fan_out(patch.clone()), vec![patch]);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_after_clean_close() {
        let tree = Arc::new(InMemoryTree::new());
        let channel = CommandChannel::new(tree.clone(), &session(), 3);
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(async move { channel.run(tx).await });

        assert_eq!(rx.recv().await.unwrap(), TreeEvent::put("/", Value::Null));
        tree.sever_subscriptions(None);
        // Second subscription delivers a fresh snapshot.
        assert_eq!(rx.recv().await.unwrap(), TreeEvent::put("/", Value::Null));
        assert_eq!(tree.subscribe_count(), 2);

        tree.set("users/u1/command/lock", &json!(true)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), TreeEvent::put("/lock", json!(true)));

        drop(rx);
        tree.sever_subscriptions(None);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_cancel_is_signalled() {
        let tree = Arc::new(InMemoryTree::new());
        tree.fail_next_subscribe("permission denied");
        let channel = CommandChannel::new(tree.clone(), &session(), 3);
        let (tx, _rx) = mpsc::channel(16);
        let err = channel.run(tx).await.unwrap_err();
        assert!(matches!(err, ChannelError::Cancelled(_)));
        assert_eq!(tree.subscribe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_consecutive_failures() {
        let tree = Arc::new(FlakyTree::default());
        let channel = CommandChannel::new(tree.clone(), &session(), 2);
        let (tx, _rx) = mpsc::channel(16);
        let err = channel.run(tx).await.unwrap_err();
        assert!(matches!(err, ChannelError::Exhausted { attempts: 2, .. }));
        assert_eq!(tree.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    /// Every subscribe fails with a retryable error before delivering anything.
    #[derive(Default)]
    struct FlakyTree {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl RemoteTree for FlakyTree {
        async fn get(&self, _path: &str) -> Result<Value, ChannelError> {
            Ok(Value::Null)
        }
        async fn set(&self, _path: &str, _value: &Value) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn update(
            &self,
            _path: &str,
            _fields: &serde_json::Map<String, Value>,
        ) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn delete(&self, _path: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn subscribe(
            &self,
            _path: &str,
            _tx: mpsc::Sender<TreeEvent>,
        ) -> Result<(), ChannelError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(ChannelError::Closed)
        }
    }
}
