use super::{parse_process_list, Platform};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

const MAX_OUTPUT_BYTES: usize = 262_144;

/// [`Platform`] backed by the host's own tools.
#[derive(Debug, Clone)]
pub struct SystemPlatform {
    timeout: Duration,
}

#[derive(Debug)]
pub(crate) struct ToolOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl SystemPlatform {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub(crate) async fn run_tool(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("{program} timed out after {}s", self.timeout.as_secs())
            })?
            .with_context(|| format!("Failed to execute {program}"))?;

        let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
        truncate_utf8_to_max_bytes(&mut stdout, MAX_OUTPUT_BYTES);
        truncate_utf8_to_max_bytes(&mut stderr, MAX_OUTPUT_BYTES);
        Ok(ToolOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout,
            stderr,
        })
    }

    /// Run and fail on a non-zero exit, returning stdout.
    pub(crate) async fn run_checked(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.run_tool(program, args).await?;
        if !output.success {
            anyhow::bail!(
                "{program} exited with {}: {}",
                output.status,
                output.stderr.trim()
            );
        }
        Ok(output.stdout)
    }

    /// Run a modal dialog tool until the user dismisses it.
    ///
    /// Unlike [`Self::run_tool`] there is no timeout and the child is not
    /// killed if this future is dropped; returns whether it exited cleanly.
    #[cfg_attr(windows, allow(dead_code))]
    pub(crate) async fn run_dialog(&self, program: &str, args: &[&str]) -> Result<bool> {
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to execute {program}"))?
            .wait()
            .await
            .with_context(|| format!("Failed to wait for {program}"))?;
        if !status.success() {
            tracing::debug!("{program} exited with {status}");
        }
        Ok(status.success())
    }

    /// Run a tool that writes an image file, then decode and remove the file.
    pub(crate) async fn capture_via(
        &self,
        program: &str,
        args: &[&str],
        file: &Path,
    ) -> Result<image::DynamicImage> {
        let result = self.run_checked(program, args).await;
        let bytes = match result {
            Ok(_) => tokio::fs::read(file)
                .await
                .with_context(|| format!("{program} did not produce {}", file.display())),
            Err(err) => Err(err),
        };
        let _ = tokio::fs::remove_file(file).await;
        image::load_from_memory(&bytes?).context("Failed to decode screen capture")
    }
}

fn truncate_utf8_to_max_bytes(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut idx = max_bytes.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    s.truncate(idx);
}

fn capture_file() -> PathBuf {
    std::env::temp_dir().join(format!("pcctl-capture-{}.png", Uuid::new_v4()))
}

/// First tool from `candidates` found on `PATH`.
#[cfg_attr(any(windows, target_os = "macos"), allow(dead_code))]
fn resolve_tool<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .find(|name| which::which(name).is_ok())
}

#[async_trait]
impl Platform for SystemPlatform {
    async fn lock_session(&self) -> Result<()> {
        imp::lock_session(self).await
    }

    async fn schedule_shutdown(&self, grace: Duration) -> Result<()> {
        imp::schedule_shutdown(self, grace).await
    }

    async fn cancel_shutdown(&self) -> Result<()> {
        imp::cancel_shutdown(self).await
    }

    async fn kill_process(&self, image_name: &str) -> Result<()> {
        imp::kill_process(self, image_name).await
    }

    async fn foreground_window_title(&self) -> Result<Option<String>> {
        imp::foreground_window_title(self).await
    }

    async fn windowed_processes(&self) -> Result<Vec<String>> {
        imp::windowed_processes(self).await
    }

    async fn open_url(&self, url: &str) -> Result<()> {
        imp::open_url(self, url).await
    }

    async fn show_message(&self, title: &str, text: &str) -> Result<()> {
        imp::show_message(self, title, text).await
    }

    async fn capture_screen(&self) -> Result<image::DynamicImage> {
        imp::capture_screen(self).await
    }

    fn host_name(&self) -> Option<String> {
        hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().trim().to_string())
            .filter(|h| !h.is_empty())
    }
}

#[cfg(windows)]
mod imp {
    use super::*;

    const WINDOWED_PROCESSES_PS: &str = "Get-Process | Where-Object {$_.MainWindowTitle -ne ''} | Select-Object ProcessName";

    pub async fn lock_session(_platform: &SystemPlatform) -> Result<()> {
        tokio::task::spawn_blocking(crate::platform::win32::lock_workstation).await?
    }

    pub async fn schedule_shutdown(platform: &SystemPlatform, grace: Duration) -> Result<()> {
        let secs = grace.as_secs().to_string();
        platform
            .run_checked("shutdown", &["/s", "/t", &secs])
            .await
            .map(drop)
    }

    pub async fn cancel_shutdown(platform: &SystemPlatform) -> Result<()> {
        platform.run_checked("shutdown", &["/a"]).await.map(drop)
    }

    pub async fn kill_process(platform: &SystemPlatform, image_name: &str) -> Result<()> {
        let output = platform
            .run_tool("taskkill", &["/f", "/im", image_name])
            .await?;
        if !output.success {
            tracing::debug!("taskkill {image_name}: {}", output.stderr.trim());
        }
        Ok(())
    }

    pub async fn foreground_window_title(_platform: &SystemPlatform) -> Result<Option<String>> {
        Ok(tokio::task::spawn_blocking(crate::platform::win32::foreground_window_title).await?)
    }

    pub async fn windowed_processes(platform: &SystemPlatform) -> Result<Vec<String>> {
        let stdout = platform
            .run_checked("powershell", &["-NoProfile", "-Command", WINDOWED_PROCESSES_PS])
            .await?;
        Ok(parse_process_list(&stdout))
    }

    pub async fn open_url(platform: &SystemPlatform, url: &str) -> Result<()> {
        platform
            .run_checked("rundll32", &["url.dll,FileProtocolHandler", url])
            .await
            .map(drop)
    }

    pub async fn show_message(_platform: &SystemPlatform, title: &str, text: &str) -> Result<()> {
        let (title, text) = (title.to_string(), text.to_string());
        tokio::task::spawn_blocking(move || crate::platform::win32::message_box(&title, &text))
            .await?;
        Ok(())
    }

    pub async fn capture_screen(platform: &SystemPlatform) -> Result<image::DynamicImage> {
        let file = capture_file();
        let script = format!(
            "Add-Type -AssemblyName System.Windows.Forms,System.Drawing; \
             $b=[System.Windows.Forms.SystemInformation]::VirtualScreen; \
             $bmp=New-Object System.Drawing.Bitmap $b.Width,$b.Height; \
             $g=[System.Drawing.Graphics]::FromImage($bmp); \
             $g.CopyFromScreen($b.Left,$b.Top,0,0,$bmp.Size); \
             $bmp.Save('{}',[System.Drawing.Imaging.ImageFormat]::Png)",
            file.display().to_string().replace('\'', "''")
        );
        platform
            .capture_via("powershell", &["-NoProfile", "-Command", &script], &file)
            .await
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use super::*;

    async fn osascript(platform: &SystemPlatform, script: &str) -> Result<String> {
        platform.run_checked("osascript", &["-e", script]).await
    }

    fn applescript_quote(text: &str) -> String {
        format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
    }

    pub async fn lock_session(platform: &SystemPlatform) -> Result<()> {
        platform.run_checked("pmset", &["displaysleepnow"]).await.map(drop)
    }

    pub async fn schedule_shutdown(platform: &SystemPlatform, grace: Duration) -> Result<()> {
        let minutes = format!("+{}", grace.as_secs().div_ceil(60));
        platform.run_checked("shutdown", &["-h", &minutes]).await.map(drop)
    }

    pub async fn cancel_shutdown(platform: &SystemPlatform) -> Result<()> {
        platform.run_checked("killall", &["shutdown"]).await.map(drop)
    }

    pub async fn kill_process(platform: &SystemPlatform, image_name: &str) -> Result<()> {
        let output = platform.run_tool("pkill", &["-x", image_name]).await?;
        if !output.success {
            tracing::debug!("pkill {image_name}: no matching process");
        }
        Ok(())
    }

    pub async fn foreground_window_title(platform: &SystemPlatform) -> Result<Option<String>> {
        let out = osascript(
            platform,
            "tell application \"System Events\" to get name of first application process whose frontmost is true",
        )
        .await?;
        let title = out.trim().to_string();
        Ok((!title.is_empty()).then_some(title))
    }

    pub async fn windowed_processes(platform: &SystemPlatform) -> Result<Vec<String>> {
        let out = osascript(
            platform,
            "tell application \"System Events\" to get name of every application process whose background only is false",
        )
        .await?;
        Ok(parse_process_list(&out.replace(", ", "\n")))
    }

    pub async fn open_url(platform: &SystemPlatform, url: &str) -> Result<()> {
        platform.run_checked("open", &[url]).await.map(drop)
    }

    pub async fn show_message(platform: &SystemPlatform, title: &str, text: &str) -> Result<()> {
        let script = format!(
            "display dialog {} with title {} buttons {{\"OK\"}} default button 1",
            applescript_quote(text),
            applescript_quote(title)
        );
        // Waits for the user; callers run this detached.
        platform.run_dialog("osascript", &["-e", &script]).await.map(drop)
    }

    pub async fn capture_screen(platform: &SystemPlatform) -> Result<image::DynamicImage> {
        let file = capture_file();
        let path = file.display().to_string();
        platform
            .capture_via("screencapture", &["-x", "-t", "png", &path], &file)
            .await
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
mod imp {
    use super::*;

    pub async fn lock_session(platform: &SystemPlatform) -> Result<()> {
        if platform.run_checked("loginctl", &["lock-session"]).await.is_ok() {
            return Ok(());
        }
        platform
            .run_checked("xdg-screensaver", &["lock"])
            .await
            .map(drop)
    }

    pub async fn schedule_shutdown(platform: &SystemPlatform, grace: Duration) -> Result<()> {
        let minutes = format!("+{}", grace.as_secs().div_ceil(60));
        platform
            .run_checked("shutdown", &["-h", &minutes])
            .await
            .map(drop)
    }

    pub async fn cancel_shutdown(platform: &SystemPlatform) -> Result<()> {
        platform.run_checked("shutdown", &["-c"]).await.map(drop)
    }

    pub async fn kill_process(platform: &SystemPlatform, image_name: &str) -> Result<()> {
        let output = platform.run_tool("pkill", &["-x", image_name]).await?;
        if !output.success {
            tracing::debug!("pkill {image_name}: no matching process");
        }
        Ok(())
    }

    pub async fn foreground_window_title(platform: &SystemPlatform) -> Result<Option<String>> {
        let output = platform
            .run_tool("xdotool", &["getactivewindow", "getwindowname"])
            .await?;
        let title = output.stdout.trim().to_string();
        // xdotool exits non-zero when no window has focus.
        Ok((output.success && !title.is_empty()).then_some(title))
    }

    pub async fn windowed_processes(platform: &SystemPlatform) -> Result<Vec<String>> {
        let listing = platform.run_checked("wmctrl", &["-lp"]).await?;
        let mut names = String::new();
        for pid in parse_wmctrl_pids(&listing) {
            if let Ok(comm) = tokio::fs::read_to_string(format!("/proc/{pid}/comm")).await {
                names.push_str(comm.trim());
                names.push('\n');
            }
        }
        Ok(parse_process_list(&names))
    }

    pub async fn open_url(platform: &SystemPlatform, url: &str) -> Result<()> {
        platform.run_checked("xdg-open", &[url]).await.map(drop)
    }

    pub async fn show_message(platform: &SystemPlatform, title: &str, text: &str) -> Result<()> {
        match resolve_tool(&["zenity", "kdialog", "notify-send"]) {
            Some("zenity") => {
                let title_arg = format!("--title={title}");
                let text_arg = format!("--text={text}");
                platform
                    .run_dialog("zenity", &zenity_info_args(&title_arg, &text_arg))
                    .await
                    .map(drop)
            }
            Some("kdialog") => platform
                .run_dialog("kdialog", &["--title", title, "--msgbox", text])
                .await
                .map(drop),
            Some(tool) => platform.run_checked(tool, &[title, text]).await.map(drop),
            None => anyhow::bail!("no message dialog tool found (zenity, kdialog, notify-send)"),
        }
    }

    pub async fn capture_screen(platform: &SystemPlatform) -> Result<image::DynamicImage> {
        let file = capture_file();
        let path = file.display().to_string();
        match resolve_tool(&["grim", "gnome-screenshot", "spectacle", "import", "scrot"]) {
            Some("grim") => platform.capture_via("grim", &[path.as_str()], &file).await,
            Some("gnome-screenshot") => {
                platform
                    .capture_via("gnome-screenshot", &["-f", &path], &file)
                    .await
            }
            Some("spectacle") => {
                platform
                    .capture_via("spectacle", &["-b", "-n", "-f", "-o", &path], &file)
                    .await
            }
            Some("import") => {
                platform
                    .capture_via("import", &["-window", "root", &path], &file)
                    .await
            }
            Some(tool) => platform.capture_via(tool, &["-o", &path], &file).await,
            None => anyhow::bail!("no screen capture tool found (grim, gnome-screenshot, spectacle, import, scrot)"),
        }
    }

    /// PIDs from `wmctrl -lp` (third column), skipping desktop-owned windows.
    /// Plain-text info box; zenity would otherwise parse Pango markup.
    pub(super) fn zenity_info_args<'a>(title_arg: &'a str, text_arg: &'a str) -> [&'a str; 4] {
        ["--info", "--no-markup", title_arg, text_arg]
    }

    pub(super) fn parse_wmctrl_pids(listing: &str) -> Vec<u32> {
        let mut pids = Vec::new();
        for line in listing.lines() {
            let Some(pid) = line
                .split_whitespace()
                .nth(2)
                .and_then(|p| p.parse::<u32>().ok())
                .filter(|p| *p > 0)
            else {
                continue;
            };
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
        pids
    }
}
