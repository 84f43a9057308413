//! Typed decision protocol for deskpilot.
//!
//! A reasoning engine looks at a [`DecisionRequest`] and returns one
//! [`Decision`]: an evaluation of the previous step, a plan, a thought and
//! exactly one [`Action`]. Replies are validated here, at the boundary, so
//! the control loop only ever sees well-typed actions.

pub mod action;
pub mod backend;
pub mod decision;
pub mod error;
pub mod keys;
pub mod request;

pub use action::{Action, MouseButton, Point, ScrollDirection};
pub use backend::{
    decision_from_response, HttpReasoningBackend, ReasoningEngine, DEFAULT_REASONING_URL,
    REASONING_TOKEN_ENV, REASONING_URL_ENV,
};
pub use decision::{Decision, EvaluationTag};
pub use error::{DecisionParseError, ReasoningError};
pub use keys::{Key, KeyCombo, KeyComboError, Modifier, NamedKey};
pub use request::{DecisionRequest, HumanExchange, ObservationDigest, ScreenshotPayload, StepDigest};
