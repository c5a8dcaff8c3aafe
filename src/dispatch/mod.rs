//! Turns command-channel events into handler invocations.
//!
//! Each event under `users/{session}/command` is filtered, normalized,
//! checked for freshness and routed to one handler by name. Every consumed
//! entry is removed from the tree afterwards so it runs at most once.

pub mod registry;

use crate::channels::{EventKind, TreeEvent};
use crate::context::AgentContext;
use crate::error::HandlerError;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use registry::{ClearPolicy, Handler, HandlerRegistry};

/// Normalized command entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEntry {
    pub name: String,
    pub value: Value,
    /// Issue time in epoch milliseconds; `None` when the writer sent no `ts`.
    pub issued_at: Option<i64>,
}

impl CommandEntry {
    /// Unwrap `{val, ts}` records; anything else is the value itself.
    pub fn normalize(name: impl Into<String>, data: Value) -> Self {
        let name = name.into();
        match data {
            Value::Object(mut map) if map.contains_key("val") => {
                let issued_at = map.get("ts").and_then(timestamp_ms);
                let value = map.remove("val").unwrap_or(Value::Null);
                Self {
                    name,
                    value,
                    issued_at,
                }
            }
            value => Self {
                name,
                value,
                issued_at: None,
            },
        }
    }

    /// Only timestamped entries can go stale; any provided `ts`, including
    /// zero or negative, is measured against the window.
    pub fn is_stale(&self, now_ms: i64, window_ms: i64) -> bool {
        self.issued_at
            .is_some_and(|ts| now_ms.saturating_sub(ts) > window_ms)
    }
}

fn timestamp_ms(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

/// Payloads that carry no command: deletions, resets and blanks. A bare `0`
/// counts as blank; `{val: 0}` does not and is left to the handler.
pub fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null | Value::Bool(false) => true,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => {
            map.is_empty() || matches!(map.get("val"), Some(Value::Null | Value::Bool(false)))
        }
        Value::Bool(true) => false,
    }
}

/// Loose truthiness for flag-style commands (`true`, `1`, `"yes"`, `{...}`).
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Text form of a command value; strings are taken as-is, other scalars are
/// rendered as JSON.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotPut,
    Empty,
    /// Change below a command entry, e.g. `/shutdown/val`.
    Nested,
    InvalidName,
}

/// What happened to one event; returned for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    Stale,
    Duplicate,
    Unknown,
    Executed,
    Failed(String),
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Last consumed `ts` per command name. Shared across dispatchers of one
/// session so a replay after reconnect is still recognized.
pub type ConsumedLog = Arc<Mutex<HashMap<String, i64>>>;

pub struct Dispatcher {
    ctx: Arc<AgentContext>,
    registry: Arc<HandlerRegistry>,
    consumed: ConsumedLog,
    now_ms: Clock,
}

impl Dispatcher {
    pub fn new(ctx: Arc<AgentContext>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            ctx,
            registry,
            consumed: ConsumedLog::default(),
            now_ms: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn with_consumed_log(mut self, consumed: ConsumedLog) -> Self {
        self.consumed = consumed;
        self
    }

    pub fn with_clock(mut self, now_ms: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.now_ms = Arc::new(now_ms);
        self
    }

    /// Process events in delivery order until the channel closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<TreeEvent>) {
        while let Some(event) = rx.recv().await {
            let path = event.path.clone();
            let outcome = self.dispatch(event).await;
            tracing::debug!("Command event {path}: {outcome:?}");
        }
        tracing::debug!("Command queue closed; dispatcher stopping");
    }

    pub async fn dispatch(&mut self, event: TreeEvent) -> Outcome {
        if event.kind != EventKind::Put {
            return Outcome::Skipped(SkipReason::NotPut);
        }
        if is_empty_payload(&event.data) {
            return Outcome::Skipped(SkipReason::Empty);
        }
        let name = match event.segments().collect::<Vec<_>>().as_slice() {
            [name] => name.to_string(),
            _ => return Outcome::Skipped(SkipReason::Nested),
        };
        let Some(path) = self.ctx.session.command_path(&name) else {
            return Outcome::Skipped(SkipReason::InvalidName);
        };
        let entry = CommandEntry::normalize(name, event.data);

        let now_ms = (self.now_ms)();
        if entry.is_stale(now_ms, self.ctx.config.freshness_window_ms) {
            tracing::info!(
                "Dropping stale command '{}' issued {}ms ago",
                entry.name,
                now_ms.saturating_sub(entry.issued_at.unwrap_or(now_ms))
            );
            self.clear(&path).await;
            return Outcome::Stale;
        }

        let replayed = entry
            .issued_at
            .is_some_and(|ts| self.consumed.lock().get(&entry.name) == Some(&ts));
        if replayed {
            tracing::debug!(
                "Command '{}' at ts {:?} already handled; clearing redelivery",
                entry.name,
                entry.issued_at
            );
            self.clear(&path).await;
            return Outcome::Duplicate;
        }

        let Some(handler) = self.registry.get(&entry.name) else {
            tracing::warn!("Unknown command '{}'; clearing it", entry.name);
            self.clear(&path).await;
            return Outcome::Unknown;
        };

        if let Some(ts) = entry.issued_at {
            self.consumed.lock().insert(entry.name.clone(), ts);
        }

        let policy = handler.clear_policy();
        if policy == ClearPolicy::ResetThenDelete {
            if let Err(err) = self.ctx.tree.set(&path, &json!({ "val": false })).await {
                tracing::warn!("Failed to reset command '{}' before running it: {err}", entry.name);
            }
        }

        tracing::info!("Executing command '{}'", entry.name);
        let outcome = match self.invoke(handler, entry.value).await {
            Ok(()) => Outcome::Executed,
            Err(err) => {
                tracing::warn!("Command '{}' failed: {err}", entry.name);
                Outcome::Failed(err.to_string())
            }
        };
        self.clear(&path).await;
        outcome
    }

    /// Run the handler on its own task so a panic stays contained.
    async fn invoke(&self, handler: Arc<dyn Handler>, value: Value) -> Result<(), HandlerError> {
        let ctx = self.ctx.clone();
        let name = handler.name();
        match tokio::spawn(async move { handler.execute(&ctx, &value).await }).await {
            Ok(result) => result,
            Err(join) if join.is_panic() => Err(HandlerError::Panicked(name.to_string())),
            Err(join) => Err(HandlerError::failed(name, join)),
        }
    }

    async fn clear(&self, path: &str) {
        if let Err(err) = self.ctx.tree.delete(path).await {
            tracing::warn!("Failed to clear {path}: {err}");
        }
    }
}
