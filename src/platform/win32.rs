//! Direct user32 calls. All functions block; call them from `spawn_blocking`.

use anyhow::Result;
use windows::core::PCWSTR;
use windows::Win32::Foundation::HWND;
use windows::Win32::System::Shutdown::LockWorkStation;
use windows::Win32::UI::WindowsAndMessaging::{
    GetForegroundWindow, GetWindowTextLengthW, GetWindowTextW, MessageBoxW, MB_ICONINFORMATION,
    MB_OKCANCEL, MB_SETFOREGROUND,
};

pub fn lock_workstation() -> Result<()> {
    unsafe { LockWorkStation() }?;
    Ok(())
}

pub fn foreground_window_title() -> Option<String> {
    unsafe {
        let hwnd = GetForegroundWindow();
        if hwnd.0.is_null() {
            return None;
        }
        let len = GetWindowTextLengthW(hwnd);
        if len <= 0 {
            return None;
        }
        let mut buf = vec![0u16; len as usize + 1];
        let copied = GetWindowTextW(hwnd, &mut buf);
        let title = String::from_utf16_lossy(&buf[..copied.max(0) as usize]);
        let title = title.trim().to_string();
        (!title.is_empty()).then_some(title)
    }
}

/// Information box with OK/Cancel; returns once dismissed.
pub fn message_box(title: &str, text: &str) {
    let wide_text: Vec<u16> = text.encode_utf16().chain(std::iter::once(0)).collect();
    let wide_title: Vec<u16> = title.encode_utf16().chain(std::iter::once(0)).collect();
    unsafe {
        MessageBoxW(
            HWND::default(),
            PCWSTR(wide_text.as_ptr()),
            PCWSTR(wide_title.as_ptr()),
            MB_ICONINFORMATION | MB_OKCANCEL | MB_SETFOREGROUND,
        );
    }
}
