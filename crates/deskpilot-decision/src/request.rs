use serde::{Deserialize, Serialize};

/// Outcome of the previous step, as shown to the reasoning side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationDigest {
    pub action: String,
    pub success: bool,
    pub message: String,
}

/// Compressed record of an earlier step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDigest {
    pub step: u32,
    pub action: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotPayload {
    /// e.g. `image/jpeg`
    pub mime_type: String,
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanExchange {
    pub question: String,
    pub answer: String,
}

/// Everything the reasoning side sees when choosing the next action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// 1-based index of the step being decided.
    pub step_index: u32,
    pub max_steps: u32,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_observation: Option<ObservationDigest>,
    pub snapshot_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_answer: Option<HumanExchange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<StepDigest>,
    /// Set when re-prompting after an unparseable reply; holds the parse error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reprompt: Option<String>,
}
