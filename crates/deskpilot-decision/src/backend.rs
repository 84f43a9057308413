//! Reasoning backends.

use crate::decision::Decision;
use crate::error::ReasoningError;
use crate::request::DecisionRequest;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const REASONING_URL_ENV: &str = "DESKPILOT_REASONING_URL";
pub const REASONING_TOKEN_ENV: &str = "DESKPILOT_REASONING_TOKEN";
pub const DEFAULT_REASONING_URL: &str = "http://127.0.0.1:8787/v1/decide";

/// Chooses exactly one action per call.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, ReasoningError>;
}

/// Backend response structure
#[derive(Debug, Deserialize)]
struct BackendResponse {
    #[serde(default)]
    decision: Option<Value>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[allow(dead_code)]
    duration_ms: Option<u64>,
    #[allow(dead_code)]
    model_used: Option<String>,
}

/// Posts each [`DecisionRequest`] as JSON to an HTTP endpoint.
///
/// The endpoint answers with either a structured decision object, a
/// `{"decision": {...}}` wrapper, or `{"text": "..."}` holding a raw model
/// reply, which is parsed with [`Decision::parse`].
#[derive(Debug, Clone)]
pub struct HttpReasoningBackend {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpReasoningBackend {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ReasoningError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }

    /// URL from `DESKPILOT_REASONING_URL`, bearer token from `DESKPILOT_REASONING_TOKEN`.
    pub fn from_env(timeout: Duration) -> Result<Self, ReasoningError> {
        let url = env::var(REASONING_URL_ENV).unwrap_or_else(|_| DEFAULT_REASONING_URL.to_string());
        let token = env::var(REASONING_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        Self::new(url, token, timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReasoningEngine for HttpReasoningBackend {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, ReasoningError> {
        info!(
            "[reasoning] Calling backend at {} (step {}/{}, query: {})",
            self.url,
            request.step_index,
            request.max_steps,
            request.query.chars().take(50).collect::<String>()
        );

        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!("[reasoning] Backend error: {} - {}", status, text);
            return Err(ReasoningError::Backend(format!(
                "backend returned {status}: {text}"
            )));
        }

        let body = resp.text().await?;
        debug!(
            "[reasoning] Backend response: {}",
            body.chars().take(500).collect::<String>()
        );
        decision_from_response(&body)
    }
}

/// Interpret a backend response body.
pub fn decision_from_response(body: &str) -> Result<Decision, ReasoningError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ReasoningError::Backend(format!("Failed to parse backend response: {e}")))?;

    // A bare decision object carries its action directly.
    if value.get("action_name").is_some() || value.get("action").is_some() {
        return Ok(Decision::from_value(&value)?);
    }

    let response: BackendResponse = serde_json::from_value(value)
        .map_err(|e| ReasoningError::Backend(format!("Failed to parse backend response: {e}")))?;

    if let Some(error) = response.error {
        return Err(ReasoningError::Backend(error));
    }
    if let Some(decision) = response.decision {
        return Ok(Decision::from_value(&decision)?);
    }
    if let Some(text) = response.text {
        return Ok(Decision::parse(&text)?);
    }
    Err(ReasoningError::Backend(
        "backend response has neither 'decision' nor 'text'".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::error::DecisionParseError;

    #[test]
    fn test_response_with_bare_decision() {
        let body = r#"{"evaluation": "Success", "action_name": "Wait-Tool", "action_input": {"duration": 2}}"#;
        let decision = decision_from_response(body).unwrap();
        assert_eq!(decision.action, Action::Wait { seconds: 2.0 });
    }

    #[test]
    fn test_response_with_text_reply() {
        let body = serde_json::json!({
            "text": "<evaluate>Neutral</evaluate><action_name>Done-Tool</action_name><action_input>{\"answer\": \"all set\"}</action_input>",
            "model_used": "local"
        })
        .to_string();
        let decision = decision_from_response(&body).unwrap();
        assert_eq!(
            decision.action,
            Action::Done {
                summary: "all set".into()
            }
        );
    }

    #[test]
    fn test_response_errors() {
        assert!(matches!(
            decision_from_response(r#"{"error": "quota exceeded"}"#),
            Err(ReasoningError::Backend(msg)) if msg == "quota exceeded"
        ));
        assert!(matches!(
            decision_from_response(r#"{"text": "I am not sure"}"#),
            Err(ReasoningError::Malformed(DecisionParseError::NoDecisionFound))
        ));
        assert!(matches!(
            decision_from_response("not json"),
            Err(ReasoningError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_backend_reports_connection_failure() {
        let backend = HttpReasoningBackend::new(
            "http://127.0.0.1:9/unreachable",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let request = DecisionRequest {
            step_index: 1,
            max_steps: 5,
            query: "open notepad".into(),
            prior_observation: None,
            snapshot_summary: String::new(),
            screenshot: None,
            human_answer: None,
            history: vec![],
            reprompt: None,
        };
        assert!(matches!(
            backend.decide(&request).await,
            Err(ReasoningError::Backend(_))
        ));
    }
}
