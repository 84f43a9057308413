//! Windows backend: UI Automation for trees and keys, Win32 for windows and
//! the mouse, `xcap` for screen capture.

mod input;
mod tree_builder;

use super::{process_names, AccessibilityEngine, ScreenCapture, TreeBuildConfig, WindowInfo};
use crate::element::UINode;
use crate::errors::AutomationError;
use crate::geometry::{Point, Rect};
use deskpilot_decision::{KeyCombo, MouseButton, ScrollDirection};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::debug;
use uiautomation::types::{TreeScope, UIProperty};
use uiautomation::variants::Variant;
use uiautomation::UIAutomation;
use windows::core::HRESULT;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};
use windows::Win32::System::Threading::{AttachThreadInput, GetCurrentThreadId};
use windows::Win32::UI::WindowsAndMessaging::{
    BringWindowToTop, GetForegroundWindow, GetSystemMetrics, GetTopWindow, GetWindow,
    GetWindowRect, GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindowVisible,
    SetForegroundWindow, ShowWindow, GW_HWNDNEXT, SM_CXSCREEN, SM_CYSCREEN, SW_RESTORE, SW_SHOW,
};

/// `RPC_E_CHANGED_MODE`: COM already initialized on this thread.
const RPC_E_CHANGED_MODE: HRESULT = HRESULT(0x80010106u32 as i32);

/// Type interval for UI Automation `send_keys`/`send_text`, in milliseconds.
const KEY_INTERVAL_MS: u64 = 10;

#[derive(Clone)]
struct ThreadSafeAutomation(Arc<UIAutomation>);

// The automation object is created in the multithreaded apartment.
unsafe impl Send for ThreadSafeAutomation {}
unsafe impl Sync for ThreadSafeAutomation {}

pub struct WindowsEngine {
    automation: ThreadSafeAutomation,
}

fn init_com() -> Result<(), AutomationError> {
    let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
    if hr.is_err() && hr != RPC_E_CHANGED_MODE {
        return Err(AutomationError::PlatformError(format!(
            "Failed to initialize COM in multithreaded mode: {hr}"
        )));
    }
    Ok(())
}

fn hwnd(window_id: u64) -> HWND {
    HWND(window_id as isize as *mut _)
}

fn window_title(hwnd: HWND) -> String {
    let mut title = vec![0u16; 512];
    let len = unsafe { GetWindowTextW(hwnd, &mut title) };
    if len > 0 {
        String::from_utf16_lossy(&title[..len as usize])
    } else {
        String::new()
    }
}

fn window_rect(hwnd: HWND) -> Rect {
    let mut rect = RECT::default();
    match unsafe { GetWindowRect(hwnd, &mut rect) } {
        Ok(()) => Rect::new(rect.left, rect.top, rect.right, rect.bottom),
        Err(_) => Rect::new(0, 0, 0, 0),
    }
}

/// Visible, titled top-level windows in z-order, top-most first.
fn enumerate_windows() -> Vec<(HWND, u32, String, Rect, bool)> {
    let mut found = Vec::new();
    unsafe {
        let mut current = match GetTopWindow(None) {
            Ok(h) => h,
            Err(_) => return found,
        };
        loop {
            if current.0.is_null() {
                break;
            }
            if IsWindowVisible(current).as_bool() {
                let mut pid = 0u32;
                GetWindowThreadProcessId(current, Some(&mut pid));
                let title = window_title(current);
                if pid > 0 && !title.trim().is_empty() {
                    found.push((
                        current,
                        pid,
                        title,
                        window_rect(current),
                        IsIconic(current).as_bool(),
                    ));
                }
            }
            current = match GetWindow(current, GW_HWNDNEXT) {
                Ok(h) => h,
                Err(_) => break,
            };
        }
    }
    found
}

impl WindowsEngine {
    pub fn new() -> Result<Self, AutomationError> {
        init_com()?;
        let automation = UIAutomation::new_direct()
            .map_err(|e| AutomationError::PlatformError(e.to_string()))?;
        Ok(Self {
            automation: ThreadSafeAutomation(Arc::new(automation)),
        })
    }

    fn focused_element(&self) -> Result<uiautomation::UIElement, AutomationError> {
        init_com()?;
        self.automation
            .0
            .get_focused_element()
            .map_err(|e| AutomationError::ElementNotFound(format!("no focused element: {e}")))
    }
}

impl AccessibilityEngine for WindowsEngine {
    fn name(&self) -> &'static str {
        "uia"
    }

    fn screen_rect(&self) -> Result<Rect, AutomationError> {
        let (w, h) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
        if w <= 0 || h <= 0 {
            return Err(AutomationError::PlatformError(
                "GetSystemMetrics returned no screen size".to_string(),
            ));
        }
        Ok(Rect::new(0, 0, w, h))
    }

    fn cursor_position(&self) -> Result<Point, AutomationError> {
        input::cursor_position()
    }

    fn applications(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        let foreground = unsafe { GetForegroundWindow() };
        let rows = enumerate_windows();
        let pids: Vec<u32> = rows.iter().map(|r| r.1).collect();
        let names = process_names(&pids);

        let mut windows: Vec<WindowInfo> = rows
            .into_iter()
            .map(|(handle, pid, title, bounds, minimized)| WindowInfo {
                window_id: handle.0 as usize as u64,
                process_id: pid,
                app_name: names.get(&pid).cloned().unwrap_or_else(|| title.clone()),
                title,
                bounds,
                is_foreground: handle.0 == foreground.0,
                minimized,
            })
            .collect();
        windows.sort_by_key(|w| !w.is_foreground);
        debug!("[windows] {} top-level windows", windows.len());
        Ok(windows)
    }

    fn window_tree(
        &self,
        window: &WindowInfo,
        config: &TreeBuildConfig,
    ) -> Result<UINode, AutomationError> {
        init_com()?;
        let automation = &self.automation.0;
        let root = automation
            .get_root_element()
            .map_err(|e| AutomationError::PlatformError(format!("no desktop root: {e}")))?;
        let condition = automation
            .create_property_condition(
                UIProperty::NativeWindowHandle,
                Variant::from(window.window_id as i32),
                None,
            )
            .map_err(|e| AutomationError::PlatformError(e.to_string()))?;
        let element = root
            .find_first(TreeScope::Children, &condition)
            .map_err(|e| {
                AutomationError::ElementNotFound(format!(
                    "no UIA element for '{}' (hwnd {:#x}): {e}",
                    window.title, window.window_id
                ))
            })?;
        tree_builder::build_window_tree(automation, &element, config)
    }

    fn capture_screen(&self) -> Result<ScreenCapture, AutomationError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| AutomationError::PlatformError(format!("Failed to get monitors: {e}")))?;
        let primary = monitors
            .into_iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .ok_or_else(|| {
                AutomationError::PlatformError("Could not find primary monitor".to_string())
            })?;
        let image = primary
            .capture_image()
            .map_err(|e| AutomationError::PlatformError(format!("Failed to capture screen: {e}")))?;
        Ok(ScreenCapture {
            width: image.width(),
            height: image.height(),
            rgba: image.into_raw(),
        })
    }

    fn move_cursor(&self, point: Point) -> Result<(), AutomationError> {
        input::move_to(point)
    }

    fn click(&self, point: Point, button: MouseButton, clicks: u8) -> Result<(), AutomationError> {
        input::click(point, button, clicks)
    }

    fn type_text(&self, text: &str) -> Result<(), AutomationError> {
        self.focused_element()?
            .send_text(text, KEY_INTERVAL_MS)
            .map_err(|e| AutomationError::PlatformError(format!("send_text failed: {e}")))
    }

    fn press_keys(&self, keys: &KeyCombo) -> Result<(), AutomationError> {
        let sequence = keys.to_uia();
        self.focused_element()?
            .send_keys(&sequence, KEY_INTERVAL_MS)
            .map_err(|e| AutomationError::PlatformError(format!("send_keys {sequence} failed: {e}")))
    }

    fn scroll(
        &self,
        point: Option<Point>,
        direction: ScrollDirection,
        amount: u32,
    ) -> Result<(), AutomationError> {
        input::scroll(point, direction, amount)
    }

    fn drag(&self, from: Point, to: Point) -> Result<(), AutomationError> {
        input::drag(from, to)
    }

    fn launch_application(&self, name: &str) -> Result<(), AutomationError> {
        let program = name.trim();
        if program.is_empty() {
            return Err(AutomationError::InvalidArgument(
                "application name is empty".to_string(),
            ));
        }
        // `start` resolves App Paths entries such as `chrome` or `winword`.
        Command::new("cmd")
            .args(["/C", "start", "", program])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| debug!("[windows] launched {}", program))
            .map_err(|e| AutomationError::PlatformError(format!("Failed to launch {program}: {e}")))
    }

    fn activate_window(&self, window: &WindowInfo) -> Result<(), AutomationError> {
        let target = hwnd(window.window_id);
        unsafe {
            let foreground = GetForegroundWindow();
            if foreground.0 == target.0 {
                return Ok(());
            }
            if IsIconic(target).as_bool() {
                let _ = ShowWindow(target, SW_RESTORE);
            }

            // Windows only lets the foreground thread hand over focus.
            let current_thread = GetCurrentThreadId();
            let foreground_thread = GetWindowThreadProcessId(foreground, None);
            let attached = foreground_thread != 0
                && foreground_thread != current_thread
                && AttachThreadInput(current_thread, foreground_thread, true).as_bool();

            let _ = BringWindowToTop(target);
            let _ = ShowWindow(target, SW_SHOW);
            let raised = SetForegroundWindow(target).as_bool();

            if attached {
                let _ = AttachThreadInput(current_thread, foreground_thread, false);
            }
            debug!(
                "[windows] activate '{}' (hwnd {:#x}): {}",
                window.title, window.window_id, raised
            );
        }
        Ok(())
    }

    fn shell_invocation(&self, command: &str) -> (String, Vec<String>) {
        (
            "powershell".to_string(),
            vec![
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
                command.to_string(),
            ],
        )
    }
}
