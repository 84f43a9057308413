//! The closed set of actions a decision may choose.

use crate::error::DecisionParseError;
use crate::keys::KeyCombo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Absolute screen coordinate in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Left => "left",
            ScrollDirection::Right => "right",
        };
        f.write_str(s)
    }
}

/// One dispatchable step. Every variant is handled exhaustively by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Launch {
        app: String,
    },
    Click {
        point: Point,
        #[serde(default)]
        button: MouseButton,
        clicks: u8,
    },
    Type {
        point: Point,
        text: String,
        #[serde(default)]
        clear: bool,
        #[serde(default)]
        press_enter: bool,
    },
    Scroll {
        /// Scroll origin. `None` scrolls wherever the cursor currently is.
        point: Option<Point>,
        direction: ScrollDirection,
        amount: u32,
    },
    Shortcut {
        keys: KeyCombo,
    },
    Drag {
        from: Point,
        to: Point,
    },
    Shell {
        command: String,
    },
    Wait {
        seconds: f64,
    },
    Human {
        question: String,
    },
    Done {
        summary: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Launch { .. } => "Launch",
            Action::Click { .. } => "Click",
            Action::Type { .. } => "Type",
            Action::Scroll { .. } => "Scroll",
            Action::Shortcut { .. } => "Shortcut",
            Action::Drag { .. } => "Drag",
            Action::Shell { .. } => "Shell",
            Action::Wait { .. } => "Wait",
            Action::Human { .. } => "Human",
            Action::Done { .. } => "Done",
        }
    }

    /// Whether dispatching this action may change what is on screen.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Action::Wait { .. } | Action::Human { .. } | Action::Done { .. }
        )
    }

    /// Validate a raw `action_name` plus `action_input` pair into a typed action.
    ///
    /// Accepts the tool-style names (`Click-Tool`) as well as plain names
    /// (`click`), and the common parameter aliases (`loc`, `from_loc`,
    /// `wheel_times`, ...).
    pub fn from_parts(name: &str, input: &Value) -> Result<Action, DecisionParseError> {
        let normalized = normalize_action_name(name);
        let args = Args {
            action: name,
            input,
        };

        let action = match normalized.as_str() {
            "launch" | "launchapp" | "open" | "openapp" | "app" => Action::Launch {
                app: args.required_str(&["name", "app", "app_name", "application"])?,
            },
            "click" | "leftclick" => {
                let clicks = args.optional_u64(&["clicks", "click_count"])?.unwrap_or(1);
                if !(1..=3).contains(&clicks) {
                    return Err(args.invalid(format!("clicks must be 1, 2 or 3, got {clicks}")));
                }
                Action::Click {
                    point: args.required_point(&["loc", "point", "position", "coordinate"])?,
                    button: args.button()?,
                    clicks: clicks as u8,
                }
            }
            "doubleclick" => Action::Click {
                point: args.required_point(&["loc", "point", "position", "coordinate"])?,
                button: args.button()?,
                clicks: 2,
            },
            "rightclick" => Action::Click {
                point: args.required_point(&["loc", "point", "position", "coordinate"])?,
                button: MouseButton::Right,
                clicks: 1,
            },
            "type" | "typetext" | "input" => Action::Type {
                point: args.required_point(&["loc", "point", "position", "coordinate"])?,
                text: args.required_raw_str(&["text", "content", "value"])?,
                clear: args.optional_bool(&["clear", "clear_first"])?.unwrap_or(false),
                press_enter: args.optional_bool(&["press_enter", "enter"])?.unwrap_or(false),
            },
            "scroll" => {
                let direction = match args.optional_str(&["direction"])? {
                    Some(d) => parse_direction(&d).ok_or_else(|| {
                        args.invalid(format!(
                            "direction must be up, down, left or right, got '{d}'"
                        ))
                    })?,
                    None => ScrollDirection::Down,
                };
                let amount = args
                    .optional_u64(&["amount", "wheel_times", "times", "magnitude"])?
                    .unwrap_or(1);
                if amount == 0 {
                    return Err(args.invalid("amount must be at least 1".to_string()));
                }
                Action::Scroll {
                    point: args.optional_point(&["loc", "point", "position", "coordinate"])?,
                    direction,
                    amount: amount.min(u32::MAX as u64) as u32,
                }
            }
            "shortcut" | "hotkey" | "keys" | "keycombination" | "key" | "presskey" => {
                Action::Shortcut {
                    keys: args.key_combo(&["shortcut", "keys", "key", "combination"])?,
                }
            }
            "drag" | "draganddrop" => Action::Drag {
                from: args.required_point(&["from_loc", "from", "source", "start"])?,
                to: args.required_point(&["to_loc", "to", "target", "destination", "end"])?,
            },
            "shell" | "powershell" | "command" | "runcommand" | "bash" => Action::Shell {
                command: args.required_raw_str(&["command", "cmd", "script"])?,
            },
            "wait" | "sleep" => {
                let seconds = args
                    .optional_f64(&["duration", "seconds", "secs"])?
                    .ok_or_else(|| args.missing("duration"))?;
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(args.invalid(format!(
                        "duration must be a non-negative number of seconds, got {seconds}"
                    )));
                }
                Action::Wait { seconds }
            }
            "human" | "ask" | "askhuman" | "askuser" | "escalate" => Action::Human {
                question: args.required_str(&["question", "text", "message"])?,
            },
            "done" | "finish" | "complete" | "answer" => Action::Done {
                summary: args.required_str(&["answer", "summary", "text", "result"])?,
            },
            _ => return Err(DecisionParseError::UnknownAction(name.to_string())),
        };

        Ok(action)
    }
}

/// `Click-Tool` -> `click`, `double_click` -> `doubleclick`.
fn normalize_action_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let stripped = lower
        .strip_suffix("-tool")
        .or_else(|| lower.strip_suffix("_tool"))
        .or_else(|| lower.strip_suffix(" tool"))
        .unwrap_or(&lower);
    stripped
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect()
}

fn parse_direction(direction: &str) -> Option<ScrollDirection> {
    match direction.trim().to_lowercase().as_str() {
        "up" => Some(ScrollDirection::Up),
        "down" => Some(ScrollDirection::Down),
        "left" => Some(ScrollDirection::Left),
        "right" => Some(ScrollDirection::Right),
        _ => None,
    }
}

/// Lookup helpers over a decision's `action_input` object.
struct Args<'a> {
    action: &'a str,
    input: &'a Value,
}

impl<'a> Args<'a> {
    fn get<'k>(&self, keys: &[&'k str]) -> Option<(&'k str, &'a Value)> {
        let obj = self.input.as_object()?;
        keys.iter()
            .find_map(|k| obj.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
    }

    fn missing(&self, field: &str) -> DecisionParseError {
        DecisionParseError::InvalidParameter {
            action: self.action.to_string(),
            reason: format!("missing required parameter '{field}'"),
        }
    }

    fn invalid(&self, reason: String) -> DecisionParseError {
        DecisionParseError::InvalidParameter {
            action: self.action.to_string(),
            reason,
        }
    }

    fn optional_str(&self, keys: &[&str]) -> Result<Option<String>, DecisionParseError> {
        match self.get(keys) {
            None => Ok(None),
            Some((_, Value::String(s))) => Ok(Some(s.trim().to_string())),
            Some((_, Value::Number(n))) => Ok(Some(n.to_string())),
            Some((k, other)) => Err(self.invalid(format!("'{k}' must be a string, got {other}"))),
        }
    }

    /// Like `required_str` but keeps surrounding whitespace, which matters for typed text.
    fn required_raw_str(&self, keys: &[&str]) -> Result<String, DecisionParseError> {
        match self.get(keys) {
            Some((_, Value::String(s))) => Ok(s.clone()),
            Some((k, other)) => Err(self.invalid(format!("'{k}' must be a string, got {other}"))),
            None => Err(self.missing(keys[0])),
        }
    }

    fn required_str(&self, keys: &[&str]) -> Result<String, DecisionParseError> {
        match self.optional_str(keys)? {
            Some(s) if !s.is_empty() => Ok(s),
            Some(_) => Err(self.invalid(format!("'{}' must not be empty", keys[0]))),
            None => Err(self.missing(keys[0])),
        }
    }

    fn optional_bool(&self, keys: &[&str]) -> Result<Option<bool>, DecisionParseError> {
        match self.get(keys) {
            None => Ok(None),
            Some((_, Value::Bool(b))) => Ok(Some(*b)),
            Some((k, Value::String(s))) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" => Ok(Some(true)),
                "false" | "no" => Ok(Some(false)),
                _ => Err(self.invalid(format!("'{k}' must be a boolean, got '{s}'"))),
            },
            Some((k, other)) => Err(self.invalid(format!("'{k}' must be a boolean, got {other}"))),
        }
    }

    fn optional_f64(&self, keys: &[&str]) -> Result<Option<f64>, DecisionParseError> {
        match self.get(keys) {
            None => Ok(None),
            Some((k, v)) => number(v)
                .map(Some)
                .ok_or_else(|| self.invalid(format!("'{k}' must be a number, got {v}"))),
        }
    }

    fn optional_u64(&self, keys: &[&str]) -> Result<Option<u64>, DecisionParseError> {
        match self.optional_f64(keys)? {
            None => Ok(None),
            Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(Some(n as u64)),
            Some(n) => Err(self.invalid(format!(
                "'{}' must be a non-negative integer, got {n}",
                keys[0]
            ))),
        }
    }

    fn button(&self) -> Result<MouseButton, DecisionParseError> {
        match self.optional_str(&["button"])? {
            None => Ok(MouseButton::Left),
            Some(b) => match b.to_lowercase().as_str() {
                "left" => Ok(MouseButton::Left),
                "right" => Ok(MouseButton::Right),
                "middle" => Ok(MouseButton::Middle),
                _ => Err(self.invalid(format!("button must be left, right or middle, got '{b}'"))),
            },
        }
    }

    fn optional_point(&self, keys: &[&str]) -> Result<Option<Point>, DecisionParseError> {
        if let Some((k, v)) = self.get(keys) {
            return point_from_value(v)
                .map(Some)
                .ok_or_else(|| self.invalid(format!("'{k}' must be a point [x, y], got {v}")));
        }
        // Flat `{"x": .., "y": ..}` form.
        match (self.optional_f64(&["x"])?, self.optional_f64(&["y"])?) {
            (Some(x), Some(y)) => Ok(Some(Point::new(x.round() as i32, y.round() as i32))),
            (None, None) => Ok(None),
            _ => Err(self.invalid("both 'x' and 'y' are required".to_string())),
        }
    }

    fn required_point(&self, keys: &[&str]) -> Result<Point, DecisionParseError> {
        self.optional_point(keys)?
            .ok_or_else(|| self.missing(keys[0]))
    }

    fn key_combo(&self, keys: &[&str]) -> Result<KeyCombo, DecisionParseError> {
        let parsed = match self.get(keys) {
            Some((_, Value::String(s))) => KeyCombo::parse(s),
            Some((k, Value::Array(items))) => {
                let names = items
                    .iter()
                    .map(|i| i.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| self.invalid(format!("'{k}' must be a list of key names")))?;
                KeyCombo::from_keys(&names)
            }
            Some((k, other)) => {
                return Err(self.invalid(format!("'{k}' must be a key combination, got {other}")))
            }
            None => return Err(self.missing(keys[0])),
        };
        parsed.map_err(|e| self.invalid(e.to_string()))
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts `[x, y]`, `{"x": x, "y": y}` and `"x,y"`.
fn point_from_value(value: &Value) -> Option<Point> {
    let (x, y) = match value {
        Value::Array(items) if items.len() == 2 => (number(&items[0])?, number(&items[1])?),
        Value::Object(obj) => (number(obj.get("x")?)?, number(obj.get("y")?)?),
        Value::String(s) => {
            let trimmed = s.trim().trim_start_matches(['(', '[']).trim_end_matches([')', ']']);
            let (x, y) = trimmed.split_once(',')?;
            (x.trim().parse().ok()?, y.trim().parse().ok()?)
        }
        _ => return None,
    };
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some(Point::new(x.round() as i32, y.round() as i32))
}
