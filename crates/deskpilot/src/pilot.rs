use crate::config::PilotConfig;
use crate::control_loop::{Run, RunOptions, RunOutcome};
use crate::errors::AutomationError;
use crate::platforms::{create_engine, AccessibilityEngine};
use crate::session::Session;
use crate::status::{NullSink, StatusSink};
use deskpilot_decision::{HttpReasoningBackend, ReasoningEngine, DEFAULT_REASONING_URL};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Entry point: a session, a reasoning engine and a status sink.
///
/// Cheap to clone; clones share the session and therefore its lease.
#[derive(Clone)]
pub struct Pilot {
    session: Arc<Session>,
    reasoning: Arc<dyn ReasoningEngine>,
    sink: Arc<dyn StatusSink>,
}

impl Pilot {
    pub fn new(session: Arc<Session>, reasoning: Arc<dyn ReasoningEngine>) -> Self {
        Self {
            session,
            reasoning,
            sink: Arc::new(NullSink),
        }
    }

    /// Platform engine for this OS plus the HTTP reasoning backend from `config`.
    pub fn from_config(config: PilotConfig) -> Result<Self, AutomationError> {
        let engine = create_engine()?;
        let url = config
            .reasoning
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_REASONING_URL.to_string());
        let backend = HttpReasoningBackend::new(
            url,
            config.reasoning.token.clone(),
            Duration::from_secs(config.reasoning.timeout_secs),
        )
        .map_err(|e| AutomationError::PlatformError(e.to_string()))?;
        info!("[pilot] reasoning backend at {}", backend.url());
        Ok(Self::with_engine(engine, Arc::new(backend), config))
    }

    pub fn with_engine(
        engine: Arc<dyn AccessibilityEngine>,
        reasoning: Arc<dyn ReasoningEngine>,
        config: PilotConfig,
    ) -> Self {
        Self::new(Session::new(engine, Arc::new(config)), reasoning)
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Create a run without driving it.
    pub fn start(
        &self,
        query: impl Into<String>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Run {
        Run::new(
            self.session.clone(),
            self.reasoning.clone(),
            self.sink.clone(),
            query,
            options,
            cancel,
        )
    }

    /// Create and drive a run until it finishes or asks the user something.
    pub async fn run(
        &self,
        query: impl Into<String>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> RunOutcome {
        self.start(query, options, cancel).drive().await
    }
}
