//! X11 backend: `xdotool` for input, `wmctrl` for windows, AT-SPI (through a
//! small python3 bridge) for accessibility trees and ImageMagick `import` for
//! screen capture.

use super::{process_names, AccessibilityEngine, ScreenCapture, TreeBuildConfig, WindowInfo};
use crate::element::{ElementAttributes, UINode};
use crate::errors::AutomationError;
use crate::geometry::{Point, Rect};
use deskpilot_decision::{KeyCombo, MouseButton, ScrollDirection};
use serde::Deserialize;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Dumps one application's AT-SPI tree as JSON.
///
/// argv: pid, window title, max depth
const ATSPI_BRIDGE: &str = r#"
import json, sys
import gi
gi.require_version('Atspi', '2.0')
from gi.repository import Atspi

pid, title, max_depth = int(sys.argv[1]), sys.argv[2], int(sys.argv[3])

def node(obj, depth):
    try:
        states = obj.get_state_set()
        ext = obj.get_extents(Atspi.CoordType.SCREEN)
        text = None
        try:
            iface = obj.get_text()
            if iface is not None:
                text = iface.get_text(0, min(iface.get_character_count(), 500))
        except Exception:
            pass
        out = {
            "role": obj.get_role_name(),
            "name": obj.get_name() or None,
            "value": text,
            "x": ext.x, "y": ext.y, "w": ext.width, "h": ext.height,
            "enabled": states.contains(Atspi.StateType.ENABLED) or states.contains(Atspi.StateType.SENSITIVE),
            "showing": states.contains(Atspi.StateType.SHOWING),
            "focusable": states.contains(Atspi.StateType.FOCUSABLE),
            "children": [],
        }
        if depth < max_depth:
            for i in range(obj.get_child_count()):
                child = obj.get_child_at_index(i)
                if child is not None:
                    sub = node(child, depth + 1)
                    if sub is not None:
                        out["children"].append(sub)
        return out
    except Exception:
        return None

desktop = Atspi.get_desktop(0)
for i in range(desktop.get_child_count()):
    app = desktop.get_child_at_index(i)
    if app is None or app.get_process_id() != pid:
        continue
    frames = [app.get_child_at_index(j) for j in range(app.get_child_count())]
    frames = [f for f in frames if f is not None]
    match = [f for f in frames if title and (f.get_name() or "") == title]
    target = (match or frames or [None])[0]
    if target is not None:
        print(json.dumps(node(target, 0)))
        sys.exit(0)
print("null")
"#;

#[derive(Debug, Deserialize)]
struct AtspiNode {
    role: String,
    name: Option<String>,
    value: Option<String>,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    enabled: bool,
    showing: bool,
    focusable: bool,
    #[serde(default)]
    children: Vec<AtspiNode>,
}

/// AT-SPI role name to the shared control-type vocabulary.
fn map_role(atspi_role: &str) -> &'static str {
    match atspi_role {
        "push button" | "toggle button" | "button" => "Button",
        "check box" | "check menu item" => "CheckBox",
        "combo box" => "ComboBox",
        "entry" | "password text" | "editbar" | "terminal" | "text" => "Edit",
        "link" => "Hyperlink",
        "list item" => "ListItem",
        "menu item" | "menu" | "radio menu item" => "MenuItem",
        "radio button" => "RadioButton",
        "slider" => "Slider",
        "spin button" => "Spinner",
        "page tab" => "TabItem",
        "tree item" => "TreeItem",
        "table cell" => "DataItem",
        "column header" | "row header" => "HeaderItem",
        "scroll bar" => "ScrollBar",
        "document web" | "document frame" | "document text" => "Document",
        "label" | "static" | "caption" => "Text",
        "image" | "icon" => "Image",
        "status bar" => "StatusBar",
        "heading" => "Header",
        "tool tip" => "ToolTip",
        "progress bar" => "ProgressBar",
        "list" | "list box" => "List",
        "tree" | "tree table" => "Tree",
        "table" => "Table",
        "scroll pane" | "viewport" => "Pane",
        "frame" | "window" | "dialog" => "Window",
        "menu bar" => "MenuBar",
        "tool bar" => "ToolBar",
        "page tab list" => "Tab",
        _ => "Custom",
    }
}

fn convert(node: AtspiNode) -> UINode {
    let role = map_role(&node.role);
    let scrollable = matches!(
        node.role.as_str(),
        "scroll pane" | "list" | "list box" | "tree" | "tree table" | "table"
    );
    let attributes = ElementAttributes {
        role: role.to_string(),
        name: node.name,
        value: node.value,
        bounds: (node.w > 0 && node.h > 0)
            .then(|| Rect::new(node.x, node.y, node.x + node.w, node.y + node.h)),
        enabled: node.enabled,
        is_offscreen: !node.showing,
        is_keyboard_focusable: node.focusable,
        is_scrollable: scrollable,
    };
    UINode::new(attributes).with_children(node.children.into_iter().map(convert).collect())
}

/// Run a program, killing it when it outlives `timeout`.
fn run(program: &str, args: &[&str], timeout: Duration) -> Result<Vec<u8>, AutomationError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AutomationError::PlatformError(format!("Failed to execute {program}: {e}")))?;

    // Drain stdout on a thread so a large tree cannot fill the pipe and stall the child.
    let mut stdout = child.stdout.take();
    let reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(out) = stdout.as_mut() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AutomationError::Timeout(format!(
                "{program} did not finish within {timeout:?}"
            )));
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let out = reader
        .join()
        .map_err(|_| AutomationError::PlatformError(format!("{program} output reader panicked")))?;
    if !status.success() {
        let mut err = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            let _ = stderr.read_to_string(&mut err);
        }
        return Err(AutomationError::PlatformError(format!(
            "{program} {} failed: {}",
            args.first().copied().unwrap_or_default(),
            err.trim()
        )));
    }
    Ok(out)
}

fn run_text(program: &str, args: &[&str]) -> Result<String, AutomationError> {
    run(program, args, COMMAND_TIMEOUT).map(|out| String::from_utf8_lossy(&out).into_owned())
}

fn xdotool(args: &[&str]) -> Result<String, AutomationError> {
    run_text("xdotool", args)
}

fn button_number(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "1",
        MouseButton::Middle => "2",
        MouseButton::Right => "3",
    }
}

/// Parse one line of `wmctrl -lpG`:
/// `0x03a00007  0 12345  10 20 800 600 host Title words`
fn parse_wmctrl_line(line: &str) -> Option<(u64, i64, u32, Rect, String)> {
    let mut parts = line.split_whitespace();
    let id = u64::from_str_radix(parts.next()?.trim_start_matches("0x"), 16).ok()?;
    let desktop: i64 = parts.next()?.parse().ok()?;
    let pid: u32 = parts.next()?.parse().ok()?;
    let x: i32 = parts.next()?.parse().ok()?;
    let y: i32 = parts.next()?.parse().ok()?;
    let w: i32 = parts.next()?.parse().ok()?;
    let h: i32 = parts.next()?.parse().ok()?;
    let _host = parts.next()?;
    let title = parts.collect::<Vec<_>>().join(" ");
    Some((id, desktop, pid, Rect::new(x, y, x + w, y + h), title))
}

pub struct LinuxEngine;

impl LinuxEngine {
    pub fn new() -> Result<Self, AutomationError> {
        if std::env::var_os("DISPLAY").is_none() {
            return Err(AutomationError::UnsupportedPlatform(
                "no X11 DISPLAY; the Linux backend needs an X session".to_string(),
            ));
        }
        Ok(Self)
    }
}

impl AccessibilityEngine for LinuxEngine {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn screen_rect(&self) -> Result<Rect, AutomationError> {
        let out = xdotool(&["getdisplaygeometry"])?;
        let mut dims = out.split_whitespace().filter_map(|s| s.parse::<i32>().ok());
        match (dims.next(), dims.next()) {
            (Some(w), Some(h)) => Ok(Rect::new(0, 0, w, h)),
            _ => Err(AutomationError::PlatformError(format!(
                "unexpected display geometry: {out}"
            ))),
        }
    }

    fn cursor_position(&self) -> Result<Point, AutomationError> {
        // x:412 y:300 screen:0 window:65011719
        let out = xdotool(&["getmouselocation"])?;
        let field = |key: &str| {
            out.split_whitespace()
                .find_map(|kv| kv.strip_prefix(key))
                .and_then(|v| v.parse::<i32>().ok())
        };
        match (field("x:"), field("y:")) {
            (Some(x), Some(y)) => Ok(Point::new(x, y)),
            _ => Err(AutomationError::PlatformError(format!(
                "unexpected mouse location: {out}"
            ))),
        }
    }

    fn applications(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        let listing = run_text("wmctrl", &["-lpG"])?;
        let active = xdotool(&["getactivewindow"])
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok());

        let rows: Vec<_> = listing
            .lines()
            .filter_map(parse_wmctrl_line)
            // Sticky windows (desktop -1) are panels and docks.
            .filter(|(_, desktop, _, _, _)| *desktop >= 0)
            .collect();
        let pids: Vec<u32> = rows.iter().map(|r| r.2).filter(|p| *p > 0).collect();
        let names = process_names(&pids);

        // wmctrl lists bottom-most first.
        let mut windows: Vec<WindowInfo> = rows
            .into_iter()
            .rev()
            .map(|(id, _, pid, bounds, title)| WindowInfo {
                window_id: id,
                process_id: pid,
                app_name: names.get(&pid).cloned().unwrap_or_else(|| title.clone()),
                title,
                bounds,
                is_foreground: Some(id) == active,
                minimized: bounds.is_empty(),
            })
            .collect();
        // Keep the active window first even when the stacking order disagrees.
        windows.sort_by_key(|w| !w.is_foreground);
        debug!("[linux] {} top-level windows", windows.len());
        Ok(windows)
    }

    fn window_tree(
        &self,
        window: &WindowInfo,
        config: &TreeBuildConfig,
    ) -> Result<UINode, AutomationError> {
        let pid = window.process_id.to_string();
        let depth = config.max_depth.to_string();
        let out = run(
            "python3",
            &["-c", ATSPI_BRIDGE, &pid, &window.title, &depth],
            config.timeout,
        )?;
        let parsed: Option<AtspiNode> = serde_json::from_slice(&out).map_err(|e| {
            AutomationError::PlatformError(format!("invalid AT-SPI bridge output: {e}"))
        })?;
        parsed.map(convert).ok_or_else(|| {
            AutomationError::ElementNotFound(format!(
                "no accessible window for '{}' (pid {})",
                window.title, window.process_id
            ))
        })
    }

    fn capture_screen(&self) -> Result<ScreenCapture, AutomationError> {
        let png = run("import", &["-window", "root", "png:-"], COMMAND_TIMEOUT)?;
        let image = image::load_from_memory(&png)
            .map_err(|e| AutomationError::PlatformError(format!("Failed to decode screenshot: {e}")))?
            .to_rgba8();
        Ok(ScreenCapture {
            width: image.width(),
            height: image.height(),
            rgba: image.into_raw(),
        })
    }

    fn move_cursor(&self, point: Point) -> Result<(), AutomationError> {
        xdotool(&["mousemove", &point.x.to_string(), &point.y.to_string()]).map(|_| ())
    }

    fn click(&self, point: Point, button: MouseButton, clicks: u8) -> Result<(), AutomationError> {
        self.move_cursor(point)?;
        let repeat = clicks.max(1).to_string();
        xdotool(&[
            "click",
            "--repeat",
            &repeat,
            "--delay",
            "80",
            button_number(button),
        ])
        .map(|_| ())
    }

    fn type_text(&self, text: &str) -> Result<(), AutomationError> {
        xdotool(&["type", "--delay", "20", "--", text]).map(|_| ())
    }

    fn press_keys(&self, keys: &KeyCombo) -> Result<(), AutomationError> {
        xdotool(&["key", "--clearmodifiers", &keys.to_xdotool()]).map(|_| ())
    }

    fn scroll(
        &self,
        point: Option<Point>,
        direction: ScrollDirection,
        amount: u32,
    ) -> Result<(), AutomationError> {
        if let Some(p) = point {
            self.move_cursor(p)?;
        }
        // X11 maps wheel directions to buttons 4-7.
        let button = match direction {
            ScrollDirection::Up => "4",
            ScrollDirection::Down => "5",
            ScrollDirection::Left => "6",
            ScrollDirection::Right => "7",
        };
        let repeat = amount.max(1).to_string();
        xdotool(&["click", "--repeat", &repeat, "--delay", "30", button]).map(|_| ())
    }

    fn drag(&self, from: Point, to: Point) -> Result<(), AutomationError> {
        self.move_cursor(from)?;
        xdotool(&["mousedown", "1"])?;
        std::thread::sleep(Duration::from_millis(100));
        let moved = self.move_cursor(to);
        std::thread::sleep(Duration::from_millis(100));
        // Release even when the move failed so the button is not left held.
        let released = xdotool(&["mouseup", "1"]).map(|_| ());
        moved.and(released)
    }

    fn launch_application(&self, name: &str) -> Result<(), AutomationError> {
        let program = name.trim();
        if program.is_empty() {
            return Err(AutomationError::InvalidArgument(
                "application name is empty".to_string(),
            ));
        }
        let spawned = Command::new(program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(child) => {
                debug!("[linux] launched {} (pid {})", program, child.id());
                Ok(())
            }
            Err(e) => {
                warn!("[linux] {} not on PATH ({}), trying gtk-launch", program, e);
                Command::new("gtk-launch")
                    .arg(program)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map(|_| ())
                    .map_err(|e| {
                        AutomationError::PlatformError(format!("Failed to launch {program}: {e}"))
                    })
            }
        }
    }

    fn activate_window(&self, window: &WindowInfo) -> Result<(), AutomationError> {
        xdotool(&["windowactivate", "--sync", &window.window_id.to_string()]).map(|_| ())
    }

    fn shell_invocation(&self, command: &str) -> (String, Vec<String>) {
        ("sh".to_string(), vec!["-c".to_string(), command.to_string()])
    }
}
