//! Platform accessibility and input backends.

use crate::element::UINode;
use crate::errors::AutomationError;
use crate::geometry::{Point, Rect};
use deskpilot_decision::{KeyCombo, MouseButton, ScrollDirection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "windows")]
pub mod windows;

/// A top-level window as reported by the window manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    /// Native handle (HWND on Windows, X11 window id on Linux).
    pub window_id: u64,
    pub process_id: u32,
    /// Process/application name, e.g. `notepad`.
    pub app_name: String,
    pub title: String,
    pub bounds: Rect,
    pub is_foreground: bool,
    pub minimized: bool,
}

/// Raw RGBA8 screen pixels.
#[derive(Debug, Clone)]
pub struct ScreenCapture {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Configuration for tree building operations
#[derive(Debug, Clone)]
pub struct TreeBuildConfig {
    pub timeout: Duration,
    pub max_depth: usize,
}

impl Default for TreeBuildConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_depth: 60,
        }
    }
}

/// Everything the snapshot layer and the executor need from an OS.
///
/// Calls are blocking; async callers move them onto the blocking pool.
pub trait AccessibilityEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bounds of the primary screen.
    fn screen_rect(&self) -> Result<Rect, AutomationError>;

    fn cursor_position(&self) -> Result<Point, AutomationError>;

    /// Visible top-level windows, top-most first.
    fn applications(&self) -> Result<Vec<WindowInfo>, AutomationError>;

    /// Accessibility hierarchy of one window.
    fn window_tree(
        &self,
        window: &WindowInfo,
        config: &TreeBuildConfig,
    ) -> Result<UINode, AutomationError>;

    fn capture_screen(&self) -> Result<ScreenCapture, AutomationError>;

    fn move_cursor(&self, point: Point) -> Result<(), AutomationError>;

    fn click(&self, point: Point, button: MouseButton, clicks: u8) -> Result<(), AutomationError>;

    /// Types into whatever currently has keyboard focus.
    fn type_text(&self, text: &str) -> Result<(), AutomationError>;

    fn press_keys(&self, keys: &KeyCombo) -> Result<(), AutomationError>;

    fn scroll(
        &self,
        point: Option<Point>,
        direction: ScrollDirection,
        amount: u32,
    ) -> Result<(), AutomationError>;

    fn drag(&self, from: Point, to: Point) -> Result<(), AutomationError>;

    /// Start an application by name. Does not wait for its window.
    fn launch_application(&self, name: &str) -> Result<(), AutomationError>;

    /// Bring a window to the foreground, restoring it if minimized.
    fn activate_window(&self, window: &WindowInfo) -> Result<(), AutomationError>;

    /// Program and leading arguments used to run a shell command string.
    fn shell_invocation(&self, command: &str) -> (String, Vec<String>);
}

/// Create the backend for the current OS.
pub fn create_engine() -> Result<Arc<dyn AccessibilityEngine>, AutomationError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::WindowsEngine::new()?))
    }
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(linux::LinuxEngine::new()?))
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        Err(AutomationError::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        ))
    }
}

/// Lowercased base name without directory or `.exe`, for comparing app and process names.
pub(crate) fn normalize_app_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let base = lower.rsplit(['/', '\\']).next().unwrap_or(&lower).to_string();
    base.strip_suffix(".exe").unwrap_or(&base).to_string()
}

/// Process names for the given pids, lowercased without `.exe`.
pub(crate) fn process_names(pids: &[u32]) -> std::collections::HashMap<u32, String> {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let wanted: Vec<Pid> = pids.iter().map(|p| Pid::from_u32(*p)).collect();
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&wanted), true);
    pids.iter()
        .filter_map(|pid| {
            system
                .process(Pid::from_u32(*pid))
                .map(|p| (*pid, normalize_app_name(&p.name().to_string_lossy())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_app_name() {
        assert_eq!(normalize_app_name("Notepad.EXE"), "notepad");
        assert_eq!(normalize_app_name(r"C:\Windows\explorer.exe"), "explorer");
        assert_eq!(normalize_app_name("/usr/bin/gedit"), "gedit");
        assert_eq!(normalize_app_name("  Firefox "), "firefox");
    }
}
