//! Perception-and-control loop for a live desktop session
//!
//! A [`Pilot`] observes the desktop through the OS accessibility APIs (with a
//! screenshot fallback), asks a reasoning engine for exactly one action per
//! step, dispatches it, and repeats until the query is done, the user must be
//! consulted, or a budget runs out.

pub mod cache;
pub mod config;
pub mod control_loop;
pub mod element;
pub mod errors;
pub mod executor;
pub mod geometry;
pub mod pilot;
pub mod platforms;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod status;
#[cfg(test)]
mod tests;
pub mod transcript;
pub mod tree_builder;
pub mod tree_formatter;
pub mod vision;

pub use cache::{CacheKey, CacheProfile, CacheStats, StateCache};
pub use config::PilotConfig;
pub use control_loop::{
    LoopState, Run, RunOptions, RunOutcome, RunReport, StepRecord, SuspendedRun, Termination,
};
pub use element::{ElementAttributes, UINode};
pub use errors::{
    AutomationError, ConfigError, PerceptionError, RunError, SchedulerError, VisionError,
};
pub use executor::{execute_action, Observation, ObservationStatus};
pub use geometry::{Point, Rect};
pub use pilot::Pilot;
pub use platforms::{create_engine, AccessibilityEngine, TreeBuildConfig, WindowInfo};
pub use scheduler::{Cadence, ScheduledTask, Scheduler, TaskState, TaskStatus};
pub use session::{Session, SessionLease};
pub use snapshot::{AppDescriptor, Node, PerceptionSource, Role, Snapshot};
pub use status::{CallbackSink, NullSink, StatusEvent, StatusPhase, StatusSink};
pub use tokio_util::sync::CancellationToken;
pub use transcript::{Transcript, TranscriptEntry, TranscriptRole};
pub use tree_builder::TreeDiagnostics;
pub use tree_formatter::format_snapshot_summary;

// The decision protocol is part of this crate's public API.
pub use deskpilot_decision::{
    Action, Decision, DecisionRequest, EvaluationTag, HttpReasoningBackend, KeyCombo,
    MouseButton, ReasoningEngine, ReasoningError, ScrollDirection,
};
