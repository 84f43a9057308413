//! The perceive/decide/act driver.

use super::policy::{FailurePolicy, ParseVerdict};
use super::state::{first_line, LoopState, RunReport, StepRecord, Termination};
use crate::errors::RunError;
use crate::executor::{execute_action, Observation};
use crate::session::{Session, SessionLease};
use crate::snapshot::Snapshot;
use crate::status::{StatusEvent, StatusPhase, StatusSink};
use crate::transcript::{Transcript, TranscriptRole};
use crate::tree_formatter::format_snapshot_summary;
use chrono::{DateTime, Local};
use deskpilot_decision::{
    Action, Decision, DecisionRequest, EvaluationTag, HumanExchange, ObservationDigest,
    ReasoningEngine, ReasoningError,
};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Per-run knobs; anything unset comes from the session's config.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub use_vision: bool,
    /// Restrict perception to this application's window.
    pub target_app: Option<String>,
    pub max_steps: Option<u32>,
}

/// One query being worked on. Created per user query or scheduled firing.
pub struct Run {
    id: Uuid,
    query: String,
    options: RunOptions,
    session: Arc<Session>,
    reasoning: Arc<dyn ReasoningEngine>,
    sink: Arc<dyn StatusSink>,
    cancel: CancellationToken,
    lease: Option<SessionLease>,
    state: LoopState,
    policy: FailurePolicy,
    steps: Vec<StepRecord>,
    transcript: Transcript,
    snapshot: Option<Arc<Snapshot>>,
    decision: Option<Decision>,
    launched_app: Option<String>,
    reprompt: Option<String>,
    pending_answer: Option<HumanExchange>,
    question: Option<String>,
    final_summary: Option<String>,
    started_at: DateTime<Local>,
}

/// Result of driving a run until it stops.
pub enum RunOutcome {
    Finished(RunReport),
    /// The run asked the user a question and holds its session lease until
    /// answered or dropped.
    Suspended(SuspendedRun),
}

impl RunOutcome {
    /// Collapse into a result for callers that cannot answer questions.
    /// A suspended run is dropped, releasing its lease.
    pub fn into_result(self) -> Result<RunReport, RunError> {
        match self {
            RunOutcome::Finished(report) => report.into_result(),
            RunOutcome::Suspended(suspended) => Err(RunError::EscalationRequested {
                summary: suspended.run.progress_summary(),
                question: suspended.question,
            }),
        }
    }
}

impl fmt::Debug for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Finished(report) => f
                .debug_struct("Finished")
                .field("termination", &report.termination)
                .field("steps", &report.steps_taken())
                .field("summary", &report.summary)
                .finish(),
            RunOutcome::Suspended(s) => s.fmt(f),
        }
    }
}

/// A run waiting in `HumanWait`.
pub struct SuspendedRun {
    run: Run,
    question: String,
}

impl fmt::Debug for SuspendedRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendedRun")
            .field("run_id", &self.run.id)
            .field("question", &self.question)
            .field("steps", &self.run.steps_taken())
            .finish()
    }
}

impl SuspendedRun {
    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn run_id(&self) -> Uuid {
        self.run.id
    }

    pub fn steps_taken(&self) -> u32 {
        self.run.steps_taken()
    }

    /// Resume at `Perceiving` with the answer in the next decision request.
    pub fn provide_answer(self, answer: impl Into<String>) -> Run {
        let SuspendedRun { mut run, question } = self;
        let answer = answer.into();
        info!("[control_loop] run {} resumed with an answer", run.id);
        run.transcript.push(TranscriptRole::User, answer.clone());
        run.pending_answer = Some(HumanExchange { question, answer });
        run.state = LoopState::Perceiving;
        let step = run.steps_taken();
        run.emit(StatusPhase::Status, step, "Resumed with the user's answer", None);
        run
    }

    /// Give up on the question and end the run as cancelled.
    pub fn cancel(self) -> RunReport {
        let mut run = self.run;
        run.state = LoopState::Cancelled;
        run.finish()
    }
}

impl Run {
    pub fn new(
        session: Arc<Session>,
        reasoning: Arc<dyn ReasoningEngine>,
        sink: Arc<dyn StatusSink>,
        query: impl Into<String>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        let id = Uuid::new_v4();
        let policy = FailurePolicy::from_config(&session.config().run, options.max_steps);
        Self {
            id,
            query: query.into(),
            options,
            session,
            reasoning,
            sink,
            cancel,
            lease: None,
            state: LoopState::Init,
            policy,
            steps: Vec::new(),
            transcript: Transcript::new(id),
            snapshot: None,
            decision: None,
            launched_app: None,
            reprompt: None,
            pending_answer: None,
            question: None,
            final_summary: None,
            started_at: Local::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn steps_taken(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Drive the state machine until the run is terminal or waits on a human.
    #[instrument(skip(self), fields(run = %self.id))]
    pub async fn drive(mut self) -> RunOutcome {
        loop {
            match self.state {
                LoopState::Init => self.init().await,
                LoopState::Perceiving => self.perceive().await,
                LoopState::Deciding => self.decide().await,
                LoopState::Acting => self.act().await,
                LoopState::Evaluating => self.evaluate(),
                LoopState::HumanWait => {
                    let question = self.question.take().unwrap_or_default();
                    let step = self.steps_taken();
                    info!(
                        "[control_loop] run {} waiting for the user: {}",
                        self.id, question
                    );
                    self.transcript
                        .push(TranscriptRole::Assistant, question.clone());
                    self.emit(
                        StatusPhase::Status,
                        step,
                        format!("Waiting for the user: {question}"),
                        Some("Human"),
                    );
                    return RunOutcome::Suspended(SuspendedRun {
                        run: self,
                        question,
                    });
                }
                LoopState::Done
                | LoopState::Exhausted
                | LoopState::Fatal
                | LoopState::Cancelled => return RunOutcome::Finished(self.finish()),
            }
        }
    }

    async fn init(&mut self) {
        if self.lease.is_none() {
            let lease = tokio::select! {
                lease = self.session.acquire(self.id) => Some(lease),
                _ = self.cancel.cancelled() => None,
            };
            match lease {
                Some(lease) => self.lease = Some(lease),
                None => {
                    info!("[control_loop] run {} cancelled while queued", self.id);
                    self.state = LoopState::Cancelled;
                    return;
                }
            }
        }
        info!(
            "[control_loop] run {} started (max_steps: {}, failure limit: {}): {}",
            self.id,
            self.policy.max_steps(),
            self.policy.failure_limit(),
            self.query
        );
        self.transcript.push(TranscriptRole::User, self.query.clone());
        self.emit(StatusPhase::Status, 0, "Run started", None);
        self.state = LoopState::Perceiving;
    }

    async fn perceive(&mut self) {
        if self.cancel.is_cancelled() {
            info!(
                "[control_loop] run {} cancelled after {} steps",
                self.id,
                self.steps_taken()
            );
            self.state = LoopState::Cancelled;
            return;
        }
        if let Some(termination) = self.policy.verdict(self.steps_taken()) {
            self.state = termination.into();
            return;
        }

        let use_vision = self.options.use_vision;
        let target = self.options.target_app.as_deref();
        let snapshot = match self.launched_app.take() {
            Some(app) => {
                self.session
                    .get_state_after_launch(use_vision, target, &app)
                    .await
            }
            None => self.session.get_state(use_vision, target).await,
        };
        debug!(
            "[control_loop] step {} perceived gen {} ({} nodes, {:?})",
            self.steps_taken() + 1,
            snapshot.generation,
            snapshot.node_count(),
            snapshot.source
        );
        self.snapshot = Some(snapshot);
        self.state = LoopState::Deciding;
    }

    fn build_request(&self, snapshot: &Snapshot) -> DecisionRequest {
        let window = self.session.config().run.history_window;
        let from = self.steps.len().saturating_sub(window);
        DecisionRequest {
            step_index: self.steps_taken() + 1,
            max_steps: self.policy.max_steps(),
            query: self.query.clone(),
            prior_observation: self.steps.last().map(|s| ObservationDigest {
                action: s.action_name().to_string(),
                success: s.succeeded(),
                message: s.observation.message.clone(),
            }),
            snapshot_summary: format_snapshot_summary(snapshot),
            screenshot: snapshot.screenshot.clone(),
            human_answer: self.pending_answer.clone(),
            history: self.steps[from..].iter().map(StepRecord::digest).collect(),
            reprompt: self.reprompt.clone(),
        }
    }

    async fn decide(&mut self) {
        let Some(snapshot) = self.snapshot.clone() else {
            self.state = LoopState::Perceiving;
            return;
        };
        let step = self.steps_taken() + 1;
        self.emit(
            StatusPhase::Thinking,
            step,
            format!("Deciding step {}/{}", step, self.policy.max_steps()),
            None,
        );

        let request = self.build_request(&snapshot);
        let reply = self.reasoning.decide(&request).await;
        match reply {
            Ok(decision) => {
                self.policy.record_parsed();
                self.reprompt = None;
                self.pending_answer = None;
                if let Some(previous) = self.steps.last_mut() {
                    previous.evaluation = decision.evaluation;
                }
                info!(
                    "[control_loop] step {}: {} ({}) thought: {}",
                    step,
                    decision.action.name(),
                    decision.evaluation,
                    first_line(&decision.thought, 200)
                );
                let content = if decision.thought.is_empty() {
                    decision.plan.clone()
                } else {
                    decision.thought.clone()
                };
                self.transcript.push(TranscriptRole::Assistant, content);
                self.decision = Some(decision);
                self.state = LoopState::Acting;
            }
            Err(e) => {
                let message = match &e {
                    ReasoningError::Malformed(parse) => {
                        if self.policy.record_parse_failure() == ParseVerdict::Reprompt {
                            self.reprompt = Some(parse.to_string());
                        }
                        format!("Could not understand the decision: {parse}")
                    }
                    ReasoningError::Backend(reason) => {
                        self.policy.record_outcome(false);
                        format!("Reasoning backend failed: {reason}")
                    }
                };
                warn!("[control_loop] step {}: {}", step, message);
                self.transcript.push(TranscriptRole::System, message.clone());
                self.emit(StatusPhase::ToolResult, step, message.clone(), None);
                self.record_step(snapshot, None, String::new(), Observation::failure(message));
                self.state = LoopState::Evaluating;
            }
        }
    }

    async fn act(&mut self) {
        let (Some(decision), Some(snapshot)) = (self.decision.take(), self.snapshot.clone()) else {
            self.state = LoopState::Perceiving;
            return;
        };
        let step = self.steps_taken() + 1;
        let Decision {
            action, thought, ..
        } = decision;
        let name = action.name();

        self.emit(StatusPhase::ToolUse, step, describe(&action), Some(name));
        let observation = execute_action(&self.session, &action).await;
        self.policy.record_outcome(observation.is_success());
        info!(
            "[control_loop] step {} {} -> {:?}: {}",
            step,
            name,
            observation.status,
            first_line(&observation.message, 200)
        );
        self.transcript.push(
            TranscriptRole::Tool,
            format!("{name}: {}", observation.message),
        );
        self.emit(
            StatusPhase::ToolResult,
            step,
            first_line(&observation.message, 200),
            Some(name),
        );

        if let Action::Launch { app } = &action {
            if observation.is_success() {
                self.launched_app = Some(app.clone());
            }
        }
        if action.is_mutating() {
            let settle = self.session.config().settle_delay();
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
        }

        self.record_step(snapshot, Some(action), thought, observation);
        self.state = LoopState::Evaluating;
    }

    fn evaluate(&mut self) {
        let next = match self.steps.last().and_then(|s| s.action.as_ref()) {
            Some(Action::Done { summary }) => {
                self.final_summary = Some(summary.clone());
                LoopState::Done
            }
            Some(Action::Human { question }) => {
                self.question = Some(question.clone());
                LoopState::HumanWait
            }
            _ => match self.policy.verdict(self.steps_taken()) {
                Some(termination) => termination.into(),
                None => LoopState::Perceiving,
            },
        };
        debug!("[control_loop] {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn record_step(
        &mut self,
        snapshot: Arc<Snapshot>,
        action: Option<Action>,
        thought: String,
        observation: Observation,
    ) {
        let evaluation = if observation.is_success() {
            EvaluationTag::Neutral
        } else {
            EvaluationTag::Failure
        };
        self.steps.push(StepRecord {
            index: self.steps_taken() + 1,
            snapshot_generation: snapshot.generation,
            snapshot,
            action,
            thought,
            observation,
            evaluation,
        });
    }

    fn emit(
        &mut self,
        phase: StatusPhase,
        step: u32,
        message: impl Into<String>,
        action: Option<&str>,
    ) {
        let mut event = StatusEvent::new(self.id, phase, step, message);
        if let Some(name) = action {
            event = event.with_action(name);
        }
        self.transcript.attach_event(event.clone());
        self.sink.emit(event);
    }

    /// Last few steps, oldest first, one line each.
    fn progress_summary(&self) -> String {
        if self.steps.is_empty() {
            return "No steps were taken.".to_string();
        }
        let from = self.steps.len().saturating_sub(5);
        let recent: Vec<String> = self.steps[from..]
            .iter()
            .map(|s| {
                format!(
                    "step {} {} ({}): {}",
                    s.index,
                    s.action_name(),
                    if s.succeeded() { "ok" } else { "failed" },
                    first_line(&s.observation.message, 120)
                )
            })
            .collect();
        format!("Recent steps: {}", recent.join("; "))
    }

    fn finish(mut self) -> RunReport {
        let termination = self.state.termination().unwrap_or(Termination::Cancelled);
        let steps = self.steps_taken();
        let summary = match termination {
            Termination::Done => self.final_summary.take().unwrap_or_default(),
            Termination::Exhausted => format!(
                "Reached the limit of {} steps before finishing. {}",
                self.policy.max_steps(),
                self.progress_summary()
            ),
            Termination::Fatal => {
                let failures: Vec<String> = self
                    .policy
                    .recent_failures(&self.steps)
                    .into_iter()
                    .map(|s| {
                        format!(
                            "step {} {}: {}",
                            s.index,
                            s.action_name(),
                            first_line(&s.observation.message, 120)
                        )
                    })
                    .collect();
                format!(
                    "Stopped after {} consecutive failures: {}",
                    failures.len(),
                    failures.join("; ")
                )
            }
            Termination::Cancelled => {
                format!("Cancelled after {steps} steps. {}", self.progress_summary())
            }
        };

        info!(
            "[control_loop] run {} finished: {} after {} steps",
            self.id, termination, steps
        );
        let role = if termination == Termination::Done {
            TranscriptRole::Assistant
        } else {
            TranscriptRole::System
        };
        self.transcript.push(role, summary.clone());
        self.emit(
            StatusPhase::Status,
            steps,
            format!("Run {termination}: {}", first_line(&summary, 200)),
            None,
        );
        self.lease = None;

        RunReport {
            run_id: self.id,
            query: self.query,
            termination,
            summary,
            steps: self.steps,
            max_steps: self.policy.max_steps(),
            failure_limit: self.policy.failure_limit(),
            transcript: self.transcript,
            started_at: self.started_at,
            finished_at: Local::now(),
        }
    }
}

/// One-line description of an action for status events.
fn describe(action: &Action) -> String {
    match action {
        Action::Launch { app } => format!("Launching {app}"),
        Action::Click { point, clicks, .. } => format!("Clicking {point} x{clicks}"),
        Action::Type { point, text, .. } => {
            format!("Typing {} characters at {point}", text.chars().count())
        }
        Action::Scroll {
            direction, amount, ..
        } => format!("Scrolling {direction} by {amount}"),
        Action::Shortcut { keys } => format!("Pressing {keys}"),
        Action::Drag { from, to } => format!("Dragging {from} to {to}"),
        Action::Shell { command } => format!("Running: {}", first_line(command, 80)),
        Action::Wait { seconds } => format!("Waiting {seconds}s"),
        Action::Human { question } => format!("Asking the user: {question}"),
        Action::Done { .. } => "Finishing".to_string(),
    }
}
