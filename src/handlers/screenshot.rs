use crate::context::AgentContext;
use crate::dispatch::{is_truthy, Handler};
use crate::error::HandlerError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use serde_json::{json, Value};

pub const SCREENSHOT_PREFIX: &str = "screenshots";
const JPEG_QUALITY: u8 = 60;

/// `screenshot`: capture, upload, and point `status/last_screenshot` at it.
pub struct ScreenshotHandler;

#[async_trait]
impl Handler for ScreenshotHandler {
    fn name(&self) -> &'static str {
        "screenshot"
    }

    async fn execute(&self, ctx: &AgentContext, value: &Value) -> Result<(), HandlerError> {
        if !is_truthy(value) {
            return Ok(());
        }
        take_screenshot(ctx).await?;
        Ok(())
    }
}

/// Capture and publish a screenshot. Capture, encode and upload failures end
/// up in `last_screenshot.error`; only a failed status write is returned.
pub async fn take_screenshot(ctx: &AgentContext) -> Result<Value, HandlerError> {
    let record = match capture_and_upload(ctx).await {
        Ok(url) => json!({
            "url": url,
            "time": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }),
        Err(err) => {
            tracing::warn!("Screenshot failed: {err:#}");
            json!({ "error": format!("{err:#}") })
        }
    };
    ctx.tree
        .set(&ctx.session.last_screenshot_path(), &record)
        .await?;
    Ok(record)
}

async fn capture_and_upload(ctx: &AgentContext) -> Result<String> {
    let image = ctx.platform.capture_screen().await.context("capture")?;
    let bytes = tokio::task::spawn_blocking(move || encode_jpeg(&image))
        .await
        .context("encoder task")??;
    let key = format!("{SCREENSHOT_PREFIX}/{}.jpg", uuid::Uuid::new_v4());
    let object = ctx
        .storage
        .upload(&key, bytes, "image/jpeg")
        .await
        .context("upload")?;
    ctx.storage.public_url(&object).await
}

fn encode_jpeg(image: &image::DynamicImage) -> Result<Vec<u8>> {
    let rgb = image::DynamicImage::ImageRgb8(image.to_rgb8());
    let mut bytes = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY))
        .context("jpeg encode")?;
    Ok(bytes)
}
