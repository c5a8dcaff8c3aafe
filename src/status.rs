//! Periodic liveness and activity record under `users/{session}/status`.

use crate::context::AgentContext;
use crate::error::ChannelError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Shown when nothing has focus or the focused window has no title.
pub const DESKTOP_TITLE: &str = "Desktop";

/// Fields written on each publish. `None` fields are left untouched remotely,
/// which keeps `last_screenshot` and any field we failed to read this tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub online: bool,
    /// Unix seconds.
    pub heartbeat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pc_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_list: Option<Vec<String>>,
}

impl StatusRecord {
    pub fn to_fields(&self) -> Result<Map<String, Value>, ChannelError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

/// Read everything the platform can tell us right now.
pub async fn collect(ctx: &AgentContext) -> StatusRecord {
    let active_window = match ctx.platform.foreground_window_title().await {
        Ok(title) => Some(
            title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DESKTOP_TITLE.to_string()),
        ),
        Err(err) => {
            tracing::debug!("Foreground window unavailable: {err:#}");
            None
        }
    };
    let app_list = match ctx.platform.windowed_processes().await {
        Ok(apps) => Some(apps),
        Err(err) => {
            tracing::debug!("Process list unavailable: {err:#}");
            None
        }
    };
    StatusRecord {
        online: true,
        heartbeat: chrono::Utc::now().timestamp(),
        pc_name: ctx.platform.host_name(),
        active_window,
        app_list,
    }
}

/// Collect and write one status record.
pub async fn publish_once(ctx: &AgentContext) -> Result<StatusRecord, ChannelError> {
    let record = collect(ctx).await;
    ctx.tree
        .update(&ctx.session.status_root(), &record.to_fields()?)
        .await?;
    Ok(record)
}

/// Mark the device offline; used on orderly exit.
pub async fn publish_offline(ctx: &AgentContext) -> Result<(), ChannelError> {
    let mut fields = Map::new();
    fields.insert("online".into(), Value::Bool(false));
    fields.insert(
        "heartbeat".into(),
        Value::from(chrono::Utc::now().timestamp()),
    );
    ctx.tree.update(&ctx.session.status_root(), &fields).await
}

/// Publishes on a fixed interval until aborted.
pub struct StatusReporter {
    ctx: Arc<AgentContext>,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        let interval = ctx.config.status_interval();
        Self { ctx, interval }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(err) = publish_once(&self.ctx).await {
                tracing::warn!("Status publish failed: {err}");
            }
        }
    }
}
