//! View label check
//!
//! A remote controller (typically a robot arm moving a part between views)
//! asks whether all required labels are visible at a named view. Requests
//! arrive over MQTT and are evaluated once, on the next processed frame.

use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::DeployError;
use crate::models::result::ResultRecord;

/// Reserved view name that ends a checking sequence
pub const END_VIEW: &str = "end";

/// A validated request to check labels at a view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCheckRequest {
    pub view: String,
    pub required_labels: Vec<String>,
}

/// A validated inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelCheckMessage {
    Check(LabelCheckRequest),
    End,
}

/// Label check state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LabelCheckState {
    #[default]
    Idle,
    PendingCheck(LabelCheckRequest),
}

/// Label check event
#[derive(Debug, Clone)]
pub enum LabelCheckEvent {
    /// A message passed validation
    Received(LabelCheckMessage),

    /// A message failed validation
    Rejected(String),

    /// The pending request was evaluated
    Evaluated,

    /// Deployment teardown
    Reset,
}

/// Result of evaluating a request against a frame's records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Fail { missing: Vec<String> },
}

#[derive(Deserialize)]
struct RawMessage {
    view: Option<Value>,
    labels: Option<Value>,
}

/// Validate a raw payload, e.g. `{"view": "top", "labels": ["screw", "nut"]}`
pub fn validate_message(payload: &[u8]) -> Result<LabelCheckMessage, DeployError> {
    let raw: RawMessage = serde_json::from_slice(payload).map_err(|e| {
        DeployError::ValidationError(format!(
            "Label check payload is not a JSON object like {{\"labels\": [\"label1\", \"label2\"], \"view\": \"top\"}}: {}",
            e
        ))
    })?;

    let view = match raw.view {
        Some(Value::String(view)) if !view.is_empty() => view,
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(DeployError::ValidationError(
                "\"view\" key is missing from the label check payload".to_string(),
            ))
        }
        Some(other) => {
            return Err(DeployError::ValidationError(format!(
                "The \"view\" value {} is not a string",
                other
            )))
        }
    };

    if view == END_VIEW {
        return Ok(LabelCheckMessage::End);
    }

    let labels = match raw.labels {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(Value::Array(_)) | None | Some(Value::Null) => {
            return Err(DeployError::ValidationError(
                "\"labels\" key is missing or empty in the label check payload".to_string(),
            ))
        }
        Some(other) => {
            return Err(DeployError::ValidationError(format!(
                "The \"labels\" value {} is not a list",
                other
            )))
        }
    };

    let required_labels = labels
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            other => Err(DeployError::ValidationError(format!(
                "Label {} is not a string",
                other
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LabelCheckMessage::Check(LabelCheckRequest {
        view,
        required_labels,
    }))
}

/// Match required labels against detected ones, consuming one detection per
/// required label. Returns the labels left unsatisfied.
pub fn missing_labels(detected: &[&str], required: &[String]) -> Vec<String> {
    let mut remaining: Vec<&str> = detected.to_vec();
    let mut missing = Vec::new();
    for label in required {
        match remaining.iter().position(|d| *d == label.as_str()) {
            Some(i) => {
                remaining.swap_remove(i);
            }
            None => missing.push(label.clone()),
        }
    }
    missing
}

/// Evaluate a request against the records of one frame
pub fn evaluate(request: &LabelCheckRequest, records: &[ResultRecord]) -> CheckOutcome {
    let detected: Vec<&str> = records.iter().flat_map(|r| r.labels()).collect();
    info!("Required labels: {:?}", request.required_labels);
    info!("Detected labels: {:?}", detected);

    let missing = missing_labels(&detected, &request.required_labels);
    if missing.is_empty() {
        CheckOutcome::Pass
    } else {
        CheckOutcome::Fail { missing }
    }
}

/// Label check state shared between the network callbacks and the loop
#[derive(Debug, Default)]
pub struct LabelCheck {
    state: Mutex<LabelCheckState>,
}

impl LabelCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> LabelCheckState {
        self.lock().clone()
    }

    /// Handle an inbound payload. Never fails; rejected payloads are logged.
    pub fn on_message(&self, payload: &[u8]) {
        let event = match validate_message(payload) {
            Ok(message) => LabelCheckEvent::Received(message),
            Err(e) => {
                warn!("Rejected label check message: {}", e);
                LabelCheckEvent::Rejected(e.to_string())
            }
        };
        if let Err(e) = self.process(event) {
            warn!("{}", e);
        }
    }

    /// Take the pending request, leaving the state `Idle`.
    ///
    /// Each request is handed out at most once.
    pub fn take_pending(&self) -> Option<LabelCheckRequest> {
        let mut state = self.lock();
        match std::mem::take(&mut *state) {
            LabelCheckState::PendingCheck(request) => Some(request),
            LabelCheckState::Idle => None,
        }
    }

    pub fn reset(&self) {
        let _ = self.process(LabelCheckEvent::Reset);
    }

    /// Process an event and transition state
    pub fn process(&self, event: LabelCheckEvent) -> Result<(), DeployError> {
        let mut state = self.lock();
        let new_state = match (&*state, event) {
            (_, LabelCheckEvent::Received(LabelCheckMessage::Check(request))) => {
                info!("Label check requested at '{}' view", request.view);
                LabelCheckState::PendingCheck(request)
            }
            (LabelCheckState::PendingCheck(_), LabelCheckEvent::Received(LabelCheckMessage::End)) => {
                info!("Ending the label checking process");
                LabelCheckState::Idle
            }
            (LabelCheckState::Idle, LabelCheckEvent::Received(LabelCheckMessage::End)) => {
                LabelCheckState::Idle
            }
            (_, LabelCheckEvent::Rejected(_)) => LabelCheckState::Idle,
            (LabelCheckState::PendingCheck(_), LabelCheckEvent::Evaluated) => LabelCheckState::Idle,
            (_, LabelCheckEvent::Reset) => LabelCheckState::Idle,
            (state, event) => {
                return Err(DeployError::TransitionError(format!(
                    "Invalid label check transition: {:?} -> {:?}",
                    state, event
                )));
            }
        };
        *state = new_state;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LabelCheckState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
