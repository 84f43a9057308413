//! Key combinations for the Shortcut action.
//!
//! Reasoning output writes combinations as `"ctrl+shift+t"` or as a list of
//! key names. Each backend needs its own spelling: UI Automation wants
//! `{Ctrl}{Shift}t`, xdotool wants `ctrl+shift+t`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyComboError {
    #[error("Empty key combination")]
    Empty,

    #[error("Unknown key '{key}' in combination '{combo}'. Valid: enter, tab, escape, backspace, delete, space, up/down/left/right, home, end, pageup, pagedown, f1-f24, or modifiers (ctrl, alt, shift, win) with a letter")]
    UnknownKey { key: String, combo: String },

    #[error("Invalid function key '{key}' in '{combo}'. Use f1-f24.")]
    InvalidFunctionKey { key: String, combo: String },

    #[error("Combination '{0}' has only modifiers")]
    ModifiersOnly(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Win,
}

impl Modifier {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "control" | "ctrl" => Some(Modifier::Ctrl),
            "alt" | "option" => Some(Modifier::Alt),
            "shift" => Some(Modifier::Shift),
            "meta" | "cmd" | "command" | "win" | "windows" | "super" => Some(Modifier::Win),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Modifier::Ctrl => "ctrl",
            Modifier::Alt => "alt",
            Modifier::Shift => "shift",
            Modifier::Win => "win",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKey {
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Space,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    PrintScreen,
    Up,
    Down,
    Left,
    Right,
}

impl NamedKey {
    fn parse(name: &str) -> Option<Self> {
        let key = match name {
            "enter" | "return" => NamedKey::Enter,
            "tab" => NamedKey::Tab,
            "escape" | "esc" => NamedKey::Escape,
            "backspace" | "back" => NamedKey::Backspace,
            "delete" | "del" => NamedKey::Delete,
            "space" => NamedKey::Space,
            "insert" | "ins" => NamedKey::Insert,
            "home" => NamedKey::Home,
            "end" => NamedKey::End,
            "pageup" | "pgup" => NamedKey::PageUp,
            "pagedown" | "pgdown" | "pgdn" => NamedKey::PageDown,
            "printscreen" | "prtsc" => NamedKey::PrintScreen,
            "up" | "arrowup" => NamedKey::Up,
            "down" | "arrowdown" => NamedKey::Down,
            "left" | "arrowleft" => NamedKey::Left,
            "right" | "arrowright" => NamedKey::Right,
            _ => return None,
        };
        Some(key)
    }

    fn canonical(self) -> &'static str {
        match self {
            NamedKey::Enter => "enter",
            NamedKey::Tab => "tab",
            NamedKey::Escape => "escape",
            NamedKey::Backspace => "backspace",
            NamedKey::Delete => "delete",
            NamedKey::Space => "space",
            NamedKey::Insert => "insert",
            NamedKey::Home => "home",
            NamedKey::End => "end",
            NamedKey::PageUp => "pageup",
            NamedKey::PageDown => "pagedown",
            NamedKey::PrintScreen => "printscreen",
            NamedKey::Up => "up",
            NamedKey::Down => "down",
            NamedKey::Left => "left",
            NamedKey::Right => "right",
        }
    }

    fn uia(self) -> &'static str {
        match self {
            NamedKey::Enter => "{Enter}",
            NamedKey::Tab => "{Tab}",
            NamedKey::Escape => "{Escape}",
            NamedKey::Backspace => "{Backspace}",
            NamedKey::Delete => "{Delete}",
            NamedKey::Space => "{Space}",
            NamedKey::Insert => "{Insert}",
            NamedKey::Home => "{Home}",
            NamedKey::End => "{End}",
            NamedKey::PageUp => "{PageUp}",
            NamedKey::PageDown => "{PageDown}",
            NamedKey::PrintScreen => "{PrintScreen}",
            NamedKey::Up => "{Up}",
            NamedKey::Down => "{Down}",
            NamedKey::Left => "{Left}",
            NamedKey::Right => "{Right}",
        }
    }

    fn xdotool(self) -> &'static str {
        match self {
            NamedKey::Enter => "Return",
            NamedKey::Tab => "Tab",
            NamedKey::Escape => "Escape",
            NamedKey::Backspace => "BackSpace",
            NamedKey::Delete => "Delete",
            NamedKey::Space => "space",
            NamedKey::Insert => "Insert",
            NamedKey::Home => "Home",
            NamedKey::End => "End",
            NamedKey::PageUp => "Prior",
            NamedKey::PageDown => "Next",
            NamedKey::PrintScreen => "Print",
            NamedKey::Up => "Up",
            NamedKey::Down => "Down",
            NamedKey::Left => "Left",
            NamedKey::Right => "Right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Named(NamedKey),
    /// F1 through F24
    Function(u8),
    Char(char),
}

/// Zero or more modifiers followed by exactly one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyCombo {
    pub modifiers: Vec<Modifier>,
    pub key: Key,
}

impl KeyCombo {
    /// Parse `"ctrl+shift+t"`, `"Alt+F4"`, `"enter"`.
    pub fn parse(combo: &str) -> Result<Self, KeyComboError> {
        let parts: Vec<String> = combo
            .split('+')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            return Err(KeyComboError::Empty);
        }

        let mut modifiers = Vec::new();
        let mut key = None;

        for (i, part) in parts.iter().enumerate() {
            let is_last = i == parts.len() - 1;

            if !is_last {
                match Modifier::parse(part) {
                    Some(m) => {
                        if !modifiers.contains(&m) {
                            modifiers.push(m);
                        }
                        continue;
                    }
                    None => {
                        return Err(KeyComboError::UnknownKey {
                            key: part.clone(),
                            combo: combo.to_string(),
                        })
                    }
                }
            }

            key = Some(Self::parse_key(part, combo)?);
        }

        match key {
            Some(key) => Ok(KeyCombo { modifiers, key }),
            None => Err(KeyComboError::ModifiersOnly(combo.to_string())),
        }
    }

    /// Build a combination from a list of key names, `["ctrl", "c"]`.
    pub fn from_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self, KeyComboError> {
        let joined = keys
            .iter()
            .map(|k| k.as_ref().trim())
            .collect::<Vec<_>>()
            .join("+");
        Self::parse(&joined)
    }

    fn parse_key(part: &str, combo: &str) -> Result<Key, KeyComboError> {
        if let Some(named) = NamedKey::parse(part) {
            return Ok(Key::Named(named));
        }
        if Modifier::parse(part).is_some() {
            return Err(KeyComboError::ModifiersOnly(combo.to_string()));
        }
        if part.starts_with('f') && part.len() >= 2 {
            return match part[1..].parse::<u8>() {
                Ok(n) if (1..=24).contains(&n) => Ok(Key::Function(n)),
                _ => Err(KeyComboError::InvalidFunctionKey {
                    key: part.to_string(),
                    combo: combo.to_string(),
                }),
            };
        }
        let mut chars = part.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Key::Char(c)),
            _ => Err(KeyComboError::UnknownKey {
                key: part.to_string(),
                combo: combo.to_string(),
            }),
        }
    }

    /// UI Automation `send_keys` syntax: `{Ctrl}{Shift}t`.
    pub fn to_uia(&self) -> String {
        let mut out = String::new();
        for m in &self.modifiers {
            out.push_str(match m {
                Modifier::Ctrl => "{Ctrl}",
                Modifier::Alt => "{Alt}",
                Modifier::Shift => "{Shift}",
                Modifier::Win => "{Win}",
            });
        }
        match self.key {
            Key::Named(k) => out.push_str(k.uia()),
            Key::Function(n) => out.push_str(&format!("{{F{n}}}")),
            Key::Char(c) => out.push(c),
        }
        out
    }

    /// xdotool `key` syntax: `ctrl+shift+t`, `alt+F4`, `Return`.
    pub fn to_xdotool(&self) -> String {
        let mut parts: Vec<String> = self
            .modifiers
            .iter()
            .map(|m| match m {
                Modifier::Win => "super".to_string(),
                other => other.as_str().to_string(),
            })
            .collect();
        parts.push(match self.key {
            Key::Named(k) => k.xdotool().to_string(),
            Key::Function(n) => format!("F{n}"),
            Key::Char(c) => c.to_string(),
        });
        parts.join("+")
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modifiers {
            write!(f, "{}+", m.as_str())?;
        }
        match self.key {
            Key::Named(k) => write!(f, "{}", k.canonical()),
            Key::Function(n) => write!(f, "f{n}"),
            Key::Char(c) => write!(f, "{c}"),
        }
    }
}

impl TryFrom<String> for KeyCombo {
    type Error = KeyComboError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        KeyCombo::parse(&value)
    }
}

impl From<KeyCombo> for String {
    fn from(value: KeyCombo) -> Self {
        value.to_string()
    }
}
