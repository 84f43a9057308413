//! Ordered record of a run's conversation: the query, each decision,
//! each observation and the final answer.

use crate::status::StatusEvent;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub content: String,
    pub timestamp: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_events: Vec<StatusEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub run_id: Option<Uuid>,
    pub entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id: Some(run_id),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, role: TranscriptRole, content: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            role,
            content: content.into(),
            timestamp: Local::now(),
            step_events: Vec::new(),
        });
    }

    /// Attach an event to the most recent entry.
    pub fn attach_event(&mut self, event: StatusEvent) {
        if let Some(last) = self.entries.last_mut() {
            last.step_events.push(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}
