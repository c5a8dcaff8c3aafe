//! OS capabilities the handlers and the status reporter rely on.

pub mod recording;
pub mod system;
#[cfg(windows)]
mod win32;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use recording::{PlatformCall, RecordingPlatform};
pub use system::SystemPlatform;

#[async_trait]
pub trait Platform: Send + Sync {
    async fn lock_session(&self) -> Result<()>;

    /// Power off after `grace`.
    async fn schedule_shutdown(&self, grace: Duration) -> Result<()>;

    /// Abort a shutdown scheduled earlier.
    async fn cancel_shutdown(&self) -> Result<()>;

    /// Terminate every process with this executable image name.
    async fn kill_process(&self, image_name: &str) -> Result<()>;

    /// Title of the focused window; `None` when nothing has focus.
    async fn foreground_window_title(&self) -> Result<Option<String>>;

    /// Names of processes that own a visible top-level window.
    async fn windowed_processes(&self) -> Result<Vec<String>>;

    async fn open_url(&self, url: &str) -> Result<()>;

    /// Show a native message dialog. May block until dismissed.
    async fn show_message(&self, title: &str, text: &str) -> Result<()>;

    async fn capture_screen(&self) -> Result<image::DynamicImage>;

    fn host_name(&self) -> Option<String>;
}

/// Append the platform executable suffix unless already present.
pub fn executable_image_name(name: &str) -> String {
    executable_image_name_with_suffix(name, std::env::consts::EXE_SUFFIX)
}

fn executable_image_name_with_suffix(name: &str, suffix: &str) -> String {
    let name = name.trim();
    if suffix.is_empty() || name.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

/// Accept only absolute http(s) URLs.
pub fn browsable_url(raw: &str) -> Option<reqwest::Url> {
    let url = reqwest::Url::parse(raw.trim()).ok()?;
    matches!(url.scheme(), "http" | "https")
        .then_some(url)
        .filter(|u| u.host_str().is_some())
}

/// Turn tool output (one name per line, possibly with a table header) into an
/// ordered list without duplicates.
pub fn parse_process_list(output: &str) -> Vec<String> {
    let mut apps: Vec<String> = Vec::new();
    for line in output.lines() {
        let clean = line.trim();
        if clean.is_empty() || clean.contains("ProcessName") || clean.starts_with("---") {
            continue;
        }
        if !apps.iter().any(|a| a == clean) {
            apps.push(clean.to_string());
        }
    }
    apps
}
