use crate::errors::RunError;
use crate::executor::Observation;
use crate::snapshot::Snapshot;
use crate::transcript::Transcript;
use chrono::{DateTime, Local};
use deskpilot_decision::{Action, EvaluationTag, StepDigest};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Where a run is in its perceive/decide/act cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Init,
    Perceiving,
    Deciding,
    Acting,
    Evaluating,
    HumanWait,
    Done,
    Exhausted,
    Fatal,
    Cancelled,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoopState::Done | LoopState::Exhausted | LoopState::Fatal | LoopState::Cancelled
        )
    }

    pub fn termination(self) -> Option<Termination> {
        match self {
            LoopState::Done => Some(Termination::Done),
            LoopState::Exhausted => Some(Termination::Exhausted),
            LoopState::Fatal => Some(Termination::Fatal),
            LoopState::Cancelled => Some(Termination::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    Done,
    Exhausted,
    Fatal,
    Cancelled,
}

impl From<Termination> for LoopState {
    fn from(t: Termination) -> Self {
        match t {
            Termination::Done => LoopState::Done,
            Termination::Exhausted => LoopState::Exhausted,
            Termination::Fatal => LoopState::Fatal,
            Termination::Cancelled => LoopState::Cancelled,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Termination::Done => "done",
            Termination::Exhausted => "exhausted",
            Termination::Fatal => "fatal",
            Termination::Cancelled => "cancelled",
        })
    }
}

/// One completed perceive/decide/act cycle.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// 1-based.
    pub index: u32,
    pub snapshot_generation: u64,
    #[serde(skip)]
    pub snapshot: Arc<Snapshot>,
    /// `None` when the reasoning reply could not be turned into an action.
    pub action: Option<Action>,
    pub thought: String,
    pub observation: Observation,
    /// Starts from the observation; replaced by the next decision's verdict.
    pub evaluation: EvaluationTag,
}

impl StepRecord {
    pub fn action_name(&self) -> &'static str {
        self.action.as_ref().map_or("InvalidDecision", Action::name)
    }

    pub fn succeeded(&self) -> bool {
        self.observation.is_success()
    }

    pub fn digest(&self) -> StepDigest {
        StepDigest {
            step: self.index,
            action: self.action_name().to_string(),
            success: self.succeeded(),
            message: first_line(&self.observation.message, 200),
        }
    }
}

pub(crate) fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max_chars {
        format!("{}...", line.chars().take(max_chars).collect::<String>())
    } else {
        line.to_string()
    }
}

/// Final record of a run that reached a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub query: String,
    pub termination: Termination,
    pub summary: String,
    pub steps: Vec<StepRecord>,
    pub max_steps: u32,
    pub failure_limit: u32,
    pub transcript: Transcript,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunReport {
    pub fn steps_taken(&self) -> u32 {
        self.steps.len() as u32
    }

    /// `Ok` for `Done`; every other termination as its [`RunError`].
    pub fn into_result(self) -> Result<RunReport, RunError> {
        match self.termination {
            Termination::Done => Ok(self),
            Termination::Exhausted => Err(RunError::BudgetExceeded {
                max_steps: self.max_steps,
                summary: self.summary,
            }),
            Termination::Fatal => Err(RunError::FailureLimitExceeded {
                limit: self.failure_limit,
                summary: self.summary,
            }),
            Termination::Cancelled => Err(RunError::Cancelled {
                summary: self.summary,
            }),
        }
    }
}
