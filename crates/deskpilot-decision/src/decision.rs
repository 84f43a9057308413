//! Parsing reasoning replies into typed decisions.
//!
//! Two reply shapes are accepted:
//!
//! * a JSON object, bare or inside a fenced code block:
//!   `{"evaluation": "...", "plan": "...", "thought": "...", "action_name": "...", "action_input": {...}}`
//! * XML-like tags:
//!   `<evaluate>..</evaluate><plan>..</plan><thought>..</thought><action_name>..</action_name><action_input>{..}</action_input>`

use crate::action::Action;
use crate::error::DecisionParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// How the reasoning side judged the outcome of the previous step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvaluationTag {
    Success,
    #[default]
    Neutral,
    Failure,
}

impl EvaluationTag {
    /// Reads the leading word of free text such as `"Success - the window opened"`.
    pub fn from_text(text: &str) -> Self {
        let lower = text.trim().to_lowercase();
        let first = lower
            .split(|c: char| !c.is_alphanumeric())
            .find(|w| !w.is_empty())
            .unwrap_or("");
        match first {
            "success" | "succeeded" | "successful" | "pass" | "passed" | "ok" => {
                EvaluationTag::Success
            }
            "failure" | "failed" | "fail" | "error" => EvaluationTag::Failure,
            _ => EvaluationTag::Neutral,
        }
    }
}

impl fmt::Display for EvaluationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvaluationTag::Success => "Success",
            EvaluationTag::Neutral => "Neutral",
            EvaluationTag::Failure => "Failure",
        };
        f.write_str(s)
    }
}

/// One validated decision: what to do next and the reasoning around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Verdict on the previous step's outcome.
    pub evaluation: EvaluationTag,
    /// Free text accompanying the evaluation.
    #[serde(default)]
    pub evaluation_note: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub thought: String,
    pub action: Action,
}

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("valid fenced json regex")
});

static TAGS: Lazy<[(&'static str, Regex); 5]> = Lazy::new(|| {
    let tag = |name: &'static str| {
        (
            name,
            Regex::new(&format!(r"(?s)<{name}>\s*(.*?)\s*</{name}>")).expect("valid tag regex"),
        )
    };
    [
        tag("evaluate"),
        tag("plan"),
        tag("thought"),
        tag("action_name"),
        tag("action_input"),
    ]
});

fn tag_value<'t>(text: &'t str, name: &str) -> Option<&'t str> {
    TAGS.iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, re)| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

impl Decision {
    /// Parse a free-form reasoning reply.
    pub fn parse(text: &str) -> Result<Decision, DecisionParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DecisionParseError::Empty);
        }

        if text.contains("<action_name>") {
            return Self::parse_tagged(text);
        }

        let json = extract_json_object(text).ok_or(DecisionParseError::NoDecisionFound)?;
        let value: Value = serde_json::from_str(json)
            .map_err(|e| DecisionParseError::InvalidJson(e.to_string()))?;
        Self::from_value(&value)
    }

    fn parse_tagged(text: &str) -> Result<Decision, DecisionParseError> {
        let action_name =
            tag_value(text, "action_name").ok_or(DecisionParseError::MissingField("action_name"))?;
        let input = match tag_value(text, "action_input") {
            Some(raw) if !raw.is_empty() => {
                let json = extract_json_object(raw).unwrap_or(raw);
                serde_json::from_str(json)
                    .map_err(|e| DecisionParseError::InvalidJson(e.to_string()))?
            }
            _ => Value::Object(Default::default()),
        };
        let evaluation_note = tag_value(text, "evaluate").unwrap_or_default().to_string();

        Ok(Decision {
            evaluation: EvaluationTag::from_text(&evaluation_note),
            evaluation_note,
            plan: tag_value(text, "plan").unwrap_or_default().to_string(),
            thought: tag_value(text, "thought").unwrap_or_default().to_string(),
            action: Action::from_parts(action_name, &input)?,
        })
    }

    /// Build a decision from an already-decoded JSON object.
    pub fn from_value(value: &Value) -> Result<Decision, DecisionParseError> {
        let obj = value
            .as_object()
            .ok_or_else(|| DecisionParseError::InvalidJson("decision must be an object".into()))?;
        let text_field = |keys: &[&str]| -> String {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_str))
                .unwrap_or_default()
                .trim()
                .to_string()
        };

        // `"action": "click"` next to `"action_input"`, or `"action": {"name": .., "input": ..}`.
        let (name, input) = match obj.get("action") {
            Some(Value::Object(action)) => {
                let name = action
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or(DecisionParseError::MissingField("action.name"))?;
                let input = ["input", "args", "parameters"]
                    .iter()
                    .find_map(|k| action.get(*k))
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default()));
                (name.to_string(), input)
            }
            Some(Value::String(name)) => (name.clone(), action_input(obj)),
            _ => {
                let name = obj
                    .get("action_name")
                    .and_then(Value::as_str)
                    .ok_or(DecisionParseError::MissingField("action_name"))?;
                (name.to_string(), action_input(obj))
            }
        };

        let evaluation_note = text_field(&["evaluation", "evaluate"]);
        debug!(
            "[decision] parsed action '{}' (evaluation: {})",
            name, evaluation_note
        );

        Ok(Decision {
            evaluation: EvaluationTag::from_text(&evaluation_note),
            evaluation_note,
            plan: text_field(&["plan"]),
            thought: text_field(&["thought", "reasoning"]),
            action: Action::from_parts(&name, &input)?,
        })
    }
}

fn action_input(obj: &serde_json::Map<String, Value>) -> Value {
    match obj.get("action_input").or_else(|| obj.get("args")) {
        // Some models double-encode the input as a JSON string.
        Some(Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::Object(Default::default()))
        }
        Some(v) => v.clone(),
        None => Value::Object(Default::default()),
    }
}

/// Finds the JSON object in a reply: fenced block first, then outermost braces.
fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(m) = FENCED_JSON.captures(text).and_then(|c| c.get(1)) {
        return Some(m.as_str());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
