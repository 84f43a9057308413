use thiserror::Error;

/// A reasoning reply that could not be turned into a typed [`crate::Decision`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecisionParseError {
    #[error("Reasoning reply was empty")]
    Empty,

    #[error("No decision found in reply (expected a JSON object or <action_name> tags)")]
    NoDecisionFound,

    #[error("Invalid JSON in reply: {0}")]
    InvalidJson(String),

    #[error("Decision is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Invalid input for action '{action}': {reason}")]
    InvalidParameter { action: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("Malformed decision: {0}")]
    Malformed(#[from] DecisionParseError),

    #[error("Reasoning backend error: {0}")]
    Backend(String),
}

impl From<reqwest::Error> for ReasoningError {
    fn from(e: reqwest::Error) -> Self {
        ReasoningError::Backend(e.to_string())
    }
}
