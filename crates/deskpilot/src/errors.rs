use thiserror::Error;

/// Failures raised by a platform accessibility/input backend.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The snapshot layer could not observe the desktop through the accessibility tree.
///
/// Never escapes the snapshot layer; it is answered with the vision path.
#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("Tree traversal timed out after {0:?}")]
    TraversalTimeout(std::time::Duration),

    #[error("Target window is gone: {0}")]
    WindowClosed(String),

    #[error("No interactive elements after launching '{0}'")]
    NoInteractiveElements(String),

    #[error("Accessibility backend failed: {0}")]
    Backend(#[from] AutomationError),
}

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Screen capture failed: {0}")]
    Capture(#[from] AutomationError),

    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Invalid vision settings: {0}")]
    InvalidSettings(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// How a run ended when it did not end with `Done`.
///
/// Each variant carries a human-readable summary of the work done so far.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("Run needs input from the user: {question}")]
    EscalationRequested { question: String, summary: String },

    #[error("Step budget of {max_steps} exhausted: {summary}")]
    BudgetExceeded { max_steps: u32, summary: String },

    #[error("{limit} consecutive failures: {summary}")]
    FailureLimitExceeded { limit: u32, summary: String },

    #[error("Run cancelled: {summary}")]
    Cancelled { summary: String },
}

impl RunError {
    pub fn summary(&self) -> &str {
        match self {
            RunError::EscalationRequested { summary, .. }
            | RunError::BudgetExceeded { summary, .. }
            | RunError::FailureLimitExceeded { summary, .. }
            | RunError::Cancelled { summary } => summary,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Unknown task: {0}")]
    UnknownTask(uuid::Uuid),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}
