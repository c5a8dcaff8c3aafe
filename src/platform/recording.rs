//! A [`Platform`] that performs nothing and remembers what it was asked to do.

use super::Platform;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Lock,
    Shutdown(Duration),
    CancelShutdown,
    Kill(String),
    ForegroundTitle,
    WindowedProcesses,
    OpenUrl(String),
    Message { title: String, text: String },
    Capture,
}

#[derive(Debug)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    failing: Mutex<HashSet<&'static str>>,
    title: Mutex<Option<String>>,
    apps: Mutex<Vec<String>>,
    host: Option<String>,
    capture_size: (u32, u32),
}

impl Default for RecordingPlatform {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            title: Mutex::new(None),
            apps: Mutex::new(Vec::new()),
            host: Some("test-host".to_string()),
            capture_size: (4, 3),
        }
    }
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&PlatformCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(c)).count()
    }

    /// Make a capability fail. Names: `lock`, `shutdown`, `kill`, `title`,
    /// `apps`, `open_url`, `message`, `capture`.
    pub fn fail(&self, capability: &'static str) {
        self.failing.lock().insert(capability);
    }

    pub fn set_foreground_title(&self, title: Option<&str>) {
        *self.title.lock() = title.map(ToOwned::to_owned);
    }

    pub fn set_windowed_processes(&self, apps: &[&str]) {
        *self.apps.lock() = apps.iter().map(|a| (*a).to_string()).collect();
    }

    fn record(&self, capability: &'static str, call: PlatformCall) -> Result<()> {
        self.calls.lock().push(call);
        if self.failing.lock().contains(capability) {
            anyhow::bail!("{capability} unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn lock_session(&self) -> Result<()> {
        self.record("lock", PlatformCall::Lock)
    }

    async fn schedule_shutdown(&self, grace: Duration) -> Result<()> {
        self.record("shutdown", PlatformCall::Shutdown(grace))
    }

    async fn cancel_shutdown(&self) -> Result<()> {
        self.record("shutdown", PlatformCall::CancelShutdown)
    }

    async fn kill_process(&self, image_name: &str) -> Result<()> {
        self.record("kill", PlatformCall::Kill(image_name.to_string()))
    }

    async fn foreground_window_title(&self) -> Result<Option<String>> {
        self.record("title", PlatformCall::ForegroundTitle)?;
        Ok(self.title.lock().clone())
    }

    async fn windowed_processes(&self) -> Result<Vec<String>> {
        self.record("apps", PlatformCall::WindowedProcesses)?;
        Ok(self.apps.lock().clone())
    }

    async fn open_url(&self, url: &str) -> Result<()> {
        self.record("open_url", PlatformCall::OpenUrl(url.to_string()))
    }

    async fn show_message(&self, title: &str, text: &str) -> Result<()> {
        self.record(
            "message",
            PlatformCall::Message {
                title: title.to_string(),
                text: text.to_string(),
            },
        )
    }

    async fn capture_screen(&self) -> Result<image::DynamicImage> {
        self.record("capture", PlatformCall::Capture)?;
        let (w, h) = self.capture_size;
        Ok(image::DynamicImage::new_rgb8(w, h))
    }

    fn host_name(&self) -> Option<String> {
        self.host.clone()
    }
}
