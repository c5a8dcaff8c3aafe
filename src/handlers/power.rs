use crate::context::AgentContext;
use crate::dispatch::{is_truthy, ClearPolicy, Handler};
use crate::error::HandlerError;
use async_trait::async_trait;
use serde_json::Value;

/// `shutdown`: power off after the configured grace period; the value
/// `"cancel"` aborts a pending shutdown instead.
pub struct ShutdownHandler;

#[async_trait]
impl Handler for ShutdownHandler {
    fn name(&self) -> &'static str {
        "shutdown"
    }

    // The host may go down before the delete lands.
    fn clear_policy(&self) -> ClearPolicy {
        ClearPolicy::ResetThenDelete
    }

    async fn execute(&self, ctx: &AgentContext, value: &Value) -> Result<(), HandlerError> {
        if value
            .as_str()
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("cancel"))
        {
            tracing::info!("Cancelling scheduled shutdown");
            if let Err(err) = ctx.platform.cancel_shutdown().await {
                tracing::debug!("Shutdown cancel failed: {err:#}");
            }
            return Ok(());
        }
        if !is_truthy(value) {
            return Ok(());
        }
        let grace = ctx.config.shutdown_grace();
        tracing::info!("Scheduling shutdown in {}s", grace.as_secs());
        if let Err(err) = ctx.platform.schedule_shutdown(grace).await {
            tracing::debug!("Shutdown request failed: {err:#}");
        }
        Ok(())
    }
}

/// `lock`: lock the interactive session.
pub struct LockHandler;

#[async_trait]
impl Handler for LockHandler {
    fn name(&self) -> &'static str {
        "lock"
    }

    async fn execute(&self, ctx: &AgentContext, value: &Value) -> Result<(), HandlerError> {
        if !is_truthy(value) {
            return Ok(());
        }
        ctx.platform
            .lock_session()
            .await
            .map_err(|e| HandlerError::failed("lock", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::harness;
    use crate::platform::PlatformCall;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_uses_grace_and_swallows_failure() {
        let h = harness();
        ShutdownHandler.execute(&h.ctx, &json!(true)).await.unwrap();
        assert_eq!(
            h.platform.calls(),
            vec![PlatformCall::Shutdown(Duration::from_secs(10))]
        );

        h.platform.fail("shutdown");
        assert!(ShutdownHandler.execute(&h.ctx, &json!(1)).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_value_aborts_pending_shutdown() {
        let h = harness();
        ShutdownHandler
            .execute(&h.ctx, &json!(" Cancel "))
            .await
            .unwrap();
        assert_eq!(h.platform.calls(), vec![PlatformCall::CancelShutdown]);
    }

    #[tokio::test]
    async fn falsy_flags_do_nothing() {
        let h = harness();
        ShutdownHandler.execute(&h.ctx, &json!(0)).await.unwrap();
        LockHandler.execute(&h.ctx, &json!("")).await.unwrap();
        assert!(h.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn lock_reports_failure() {
        let h = harness();
        LockHandler.execute(&h.ctx, &json!(true)).await.unwrap();
        assert_eq!(h.platform.calls(), vec![PlatformCall::Lock]);

        h.platform.fail("lock");
        let err = LockHandler.execute(&h.ctx, &json!(true)).await.unwrap_err();
        assert!(err.to_string().starts_with("lock:"));
    }
}
