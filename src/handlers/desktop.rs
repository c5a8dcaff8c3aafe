use crate::context::AgentContext;
use crate::dispatch::{value_text, Handler};
use crate::error::HandlerError;
use crate::platform::{browsable_url, executable_image_name};
use crate::status;
use async_trait::async_trait;
use serde_json::Value;

pub const POPUP_TITLE: &str = "Message";

/// `popup`: show the value in a dialog without holding up dispatch.
pub struct PopupHandler;

#[async_trait]
impl Handler for PopupHandler {
    fn name(&self) -> &'static str {
        "popup"
    }

    async fn execute(&self, ctx: &AgentContext, value: &Value) -> Result<(), HandlerError> {
        let Some(text) = value_text(value) else {
            return Ok(());
        };
        let platform = ctx.platform.clone();
        tokio::spawn(async move {
            if let Err(err) = platform.show_message(POPUP_TITLE, &text).await {
                tracing::debug!("Popup failed: {err:#}");
            }
        });
        Ok(())
    }
}

/// `open_url`: open an http(s) link in the default browser.
pub struct OpenUrlHandler;

#[async_trait]
impl Handler for OpenUrlHandler {
    fn name(&self) -> &'static str {
        "open_url"
    }

    async fn execute(&self, ctx: &AgentContext, value: &Value) -> Result<(), HandlerError> {
        let Some(url) = value_text(value).as_deref().and_then(browsable_url) else {
            tracing::info!("Ignoring open_url with a non-web target: {value}");
            return Ok(());
        };
        ctx.platform
            .open_url(url.as_str())
            .await
            .map_err(|e| HandlerError::failed("open_url", e))
    }
}

/// `kill`: terminate every process with the given image name.
pub struct KillHandler;

#[async_trait]
impl Handler for KillHandler {
    fn name(&self) -> &'static str {
        "kill"
    }

    async fn execute(&self, ctx: &AgentContext, value: &Value) -> Result<(), HandlerError> {
        let Some(name) = value_text(value) else {
            return Ok(());
        };
        let image = executable_image_name(&name);
        tracing::info!("Terminating {image}");
        ctx.platform
            .kill_process(&image)
            .await
            .map_err(|e| HandlerError::failed("kill", e))
    }
}

/// `get_apps`: publish status now instead of at the next tick.
pub struct GetAppsHandler;

#[async_trait]
impl Handler for GetAppsHandler {
    fn name(&self) -> &'static str {
        "get_apps"
    }

    async fn execute(&self, ctx: &AgentContext, _value: &Value) -> Result<(), HandlerError> {
        status::publish_once(ctx).await?;
        Ok(())
    }
}
