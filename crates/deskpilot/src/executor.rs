//! Action dispatch.
//!
//! Every [`Action`] produces exactly one [`Observation`]. OS-level failures
//! become failure observations; nothing is returned as an error. Mutating
//! actions invalidate the session's snapshot cache when they complete,
//! whether they succeeded or not.

use crate::config::ExecutorConfig;
use crate::errors::AutomationError;
use crate::geometry::Point;
use crate::platforms::{normalize_app_name, AccessibilityEngine, WindowInfo};
use crate::session::Session;
use deskpilot_decision::{Action, KeyCombo, MouseButton};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationStatus {
    Success,
    Failure,
}

/// Result of dispatching one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub status: ObservationStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Observation {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ObservationStatus::Success,
            message: message.into(),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ObservationStatus::Failure,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ObservationStatus::Success
    }
}

fn button_name(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "left",
        MouseButton::Right => "right",
        MouseButton::Middle => "middle",
    }
}

fn ensure_on_screen(engine: &dyn AccessibilityEngine, points: &[Point]) -> Result<(), String> {
    let screen = engine
        .screen_rect()
        .map_err(|e| format!("Could not read screen bounds: {e}"))?;
    match points.iter().find(|p| !screen.contains(**p)) {
        Some(p) => Err(format!("Point {p} is outside the screen {screen}")),
        None => Ok(()),
    }
}

/// Cut `text` to at most `max_bytes`, on a char boundary.
fn truncate_output(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (format!("{}...[truncated]", &text[..end]), true)
}

fn find_window<'a>(windows: &'a [WindowInfo], app: &str) -> Option<&'a WindowInfo> {
    let needle = normalize_app_name(app);
    windows
        .iter()
        .find(|w| normalize_app_name(&w.app_name) == needle)
        .or_else(|| {
            windows
                .iter()
                .find(|w| w.title.to_lowercase().contains(&needle))
        })
}

/// Dispatch one action against the session's desktop.
pub async fn execute_action(session: &Session, action: &Action) -> Observation {
    info!("[executor] {} {:?}", action.name(), action);
    let settings = session.config().executor.clone();

    let observation = match dispatch(session, action, &settings).await {
        Ok(observation) => observation,
        Err(message) => {
            warn!("[executor] {} failed: {}", action.name(), message);
            Observation::failure(message)
        }
    };

    if action.is_mutating() {
        session.invalidate();
    }
    observation
}

/// Run a blocking engine call, flattening join and automation errors into a message.
async fn blocking<T, F>(session: &Session, what: &str, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&dyn AccessibilityEngine) -> Result<T, String> + Send + 'static,
{
    session
        .with_engine(f)
        .await
        .map_err(|e| format!("{what} task failed: {e}"))?
}

fn automation(context: &str) -> impl Fn(AutomationError) -> String + '_ {
    move |e| format!("{context}: {e}")
}

async fn dispatch(
    session: &Session,
    action: &Action,
    settings: &ExecutorConfig,
) -> Result<Observation, String> {
    match action.clone() {
        Action::Launch { app } => launch(session, &app, settings).await,

        Action::Click {
            point,
            button,
            clicks,
        } => {
            blocking(session, "click", move |engine| {
                ensure_on_screen(engine, &[point])?;
                engine
                    .click(point, button, clicks)
                    .map_err(automation("Click failed"))
            })
            .await?;
            let kind = match clicks {
                1 => "Single",
                2 => "Double",
                _ => "Triple",
            };
            Ok(Observation::success(format!(
                "{kind} {} clicked at {point}",
                button_name(button)
            )))
        }

        Action::Type {
            point,
            text,
            clear,
            press_enter,
        } => {
            let len = text.chars().count();
            blocking(session, "type", move |engine| {
                ensure_on_screen(engine, &[point])?;
                engine
                    .click(point, MouseButton::Left, 1)
                    .map_err(automation("Click before type failed"))?;
                std::thread::sleep(Duration::from_millis(100));
                if clear {
                    let select_all = KeyCombo::parse("ctrl+a").map_err(|e| e.to_string())?;
                    let backspace = KeyCombo::parse("backspace").map_err(|e| e.to_string())?;
                    engine
                        .press_keys(&select_all)
                        .map_err(automation("Select all failed"))?;
                    std::thread::sleep(Duration::from_millis(50));
                    engine
                        .press_keys(&backspace)
                        .map_err(automation("Clear failed"))?;
                }
                engine
                    .type_text(&text)
                    .map_err(automation("Type text failed"))?;
                if press_enter {
                    std::thread::sleep(Duration::from_millis(50));
                    let enter = KeyCombo::parse("enter").map_err(|e| e.to_string())?;
                    engine
                        .press_keys(&enter)
                        .map_err(automation("Press Enter failed"))?;
                }
                Ok(())
            })
            .await?;
            Ok(Observation::success(format!("Typed {len} characters at {point}"))
                .with_data(json!({ "cleared": clear, "pressed_enter": press_enter })))
        }

        Action::Scroll {
            point,
            direction,
            amount,
        } => {
            blocking(session, "scroll", move |engine| {
                if let Some(p) = point {
                    ensure_on_screen(engine, &[p])?;
                }
                engine
                    .scroll(point, direction, amount)
                    .map_err(automation("Scroll failed"))
            })
            .await?;
            let at = point.map(|p| format!(" at {p}")).unwrap_or_default();
            Ok(Observation::success(format!(
                "Scrolled {direction} by {amount}{at}"
            )))
        }

        Action::Shortcut { keys } => {
            let label = keys.to_string();
            blocking(session, "shortcut", move |engine| {
                engine
                    .press_keys(&keys)
                    .map_err(automation("Key press failed"))
            })
            .await?;
            Ok(Observation::success(format!("Pressed {label}")))
        }

        Action::Drag { from, to } => {
            blocking(session, "drag", move |engine| {
                ensure_on_screen(engine, &[from, to])?;
                engine.drag(from, to).map_err(automation("Drag failed"))
            })
            .await?;
            Ok(Observation::success(format!("Dragged from {from} to {to}")))
        }

        Action::Shell { command } => run_shell(session, &command, settings).await,

        Action::Wait { seconds } => {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(format!(
                    "Wait needs a non-negative number of seconds, got {seconds}"
                ));
            }
            let capped = seconds.min(settings.max_wait_secs as f64);
            let pause = Duration::try_from_secs_f64(capped)
                .map_err(|e| format!("Invalid wait of {capped}s: {e}"))?;
            tokio::time::sleep(pause).await;
            let mut message = format!("Waited {capped}s");
            if capped < seconds {
                message.push_str(&format!(" (capped from {seconds}s)"));
            }
            Ok(Observation::success(message))
        }

        Action::Human { question } => Ok(Observation::success(format!(
            "Asked the user: {question}"
        ))),

        Action::Done { summary } => Ok(Observation::success(summary)),
    }
}

async fn launch(
    session: &Session,
    app: &str,
    settings: &ExecutorConfig,
) -> Result<Observation, String> {
    let name = app.to_string();
    let existing = blocking(session, "launch", move |engine| {
        let windows = engine
            .applications()
            .map_err(automation("Could not list windows"))?;
        match find_window(&windows, &name).cloned() {
            Some(window) => {
                engine
                    .activate_window(&window)
                    .map_err(automation("Could not activate existing window"))?;
                Ok(Some(window))
            }
            None => {
                engine
                    .launch_application(&name)
                    .map_err(automation("Launch failed"))?;
                Ok(None)
            }
        }
    })
    .await?;

    let attached = existing.is_some();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(settings.launch_wait_ms);
    let poll = Duration::from_millis(settings.launch_poll_ms.max(1));

    // Wait for the window to show up, then record whether it has focus.
    loop {
        let name = app.to_string();
        let window = blocking(session, "launch", move |engine| {
            let windows = engine
                .applications()
                .map_err(automation("Could not list windows"))?;
            Ok(find_window(&windows, &name).cloned())
        })
        .await?;

        if let Some(window) = window {
            let message = if attached {
                format!("{app} was already running; switched to \"{}\"", window.title)
            } else {
                format!("Launched {app} (\"{}\")", window.title)
            };
            return Ok(Observation::success(message).with_data(json!({
                "attached": attached,
                "foreground": window.is_foreground,
                "window_title": window.title,
                "process_id": window.process_id,
            })));
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(Observation::success(format!(
                "Launched {app}; no window appeared within {}ms",
                settings.launch_wait_ms
            ))
            .with_data(json!({ "attached": attached, "foreground": false })));
        }
        tokio::time::sleep(poll).await;
    }
}

async fn run_shell(
    session: &Session,
    command: &str,
    settings: &ExecutorConfig,
) -> Result<Observation, String> {
    let (program, args) = session.engine().shell_invocation(command);
    let timeout = Duration::from_secs(settings.shell_timeout_secs);
    info!("[executor] shell via {}: {}", program, command);

    let child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to start {program}: {e}"))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| format!("Failed to read command output: {e}"))?,
        Err(_) => {
            return Ok(Observation::failure(format!(
                "Command timed out after {}s",
                settings.shell_timeout_secs
            ))
            .with_data(json!({ "timed_out": true })))
        }
    };

    let exit_code = output.status.code();
    let (stdout, stdout_truncated) =
        truncate_output(&String::from_utf8_lossy(&output.stdout), settings.max_output_bytes);
    let (stderr, stderr_truncated) =
        truncate_output(&String::from_utf8_lossy(&output.stderr), settings.max_output_bytes);

    let mut message = match exit_code {
        Some(code) => format!("Exit code {code}"),
        None => "Terminated by signal".to_string(),
    };
    if !stdout.trim().is_empty() {
        message.push_str(&format!("\nstdout:\n{}", stdout.trim_end()));
    }
    if !stderr.trim().is_empty() {
        message.push_str(&format!("\nstderr:\n{}", stderr.trim_end()));
    }

    let observation = if output.status.success() {
        Observation::success(message)
    } else {
        Observation::failure(message)
    };
    Ok(observation.with_data(json!({
        "exit_code": exit_code,
        "stdout": stdout,
        "stderr": stderr,
        "truncated": stdout_truncated || stderr_truncated,
    })))
}
