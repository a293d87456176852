//! Finite State Machine for the deployment session

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No frame source acquired, loop not running
    NotDeployed,

    /// Loop running over an acquired frame source
    Deployed,

    /// Frame source released, model and MQTT bindings kept
    Paused,
}

/// Session event
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Frame source and model acquired
    Deploy,

    /// Frame source, model or broker could not be acquired
    AcquireFailed(String),

    /// Release the frame source but keep the deployment
    Pause,

    /// Re-acquire a frame source after a pause
    Resume,

    /// End of stream, explicit end or shutdown
    End,
}

/// Session FSM
#[derive(Debug, Clone)]
pub struct SessionFsm {
    state: SessionState,
    error: Option<String>,
    sessions: u32,
}

impl SessionFsm {
    /// Create a new FSM in the not-deployed state
    pub fn new() -> Self {
        Self {
            state: SessionState::NotDeployed,
            error: None,
            sessions: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last acquisition error, cleared by a successful deploy
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of sessions started since creation
    pub fn sessions(&self) -> u32 {
        self.sessions
    }

    pub fn is_deployed(&self) -> bool {
        self.state == SessionState::Deployed
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: SessionEvent) -> Result<SessionState, DeployError> {
        let new_state = match (&self.state, &event) {
            (SessionState::NotDeployed, SessionEvent::Deploy) => {
                self.error = None;
                self.sessions += 1;
                SessionState::Deployed
            }
            (SessionState::NotDeployed, SessionEvent::AcquireFailed(err))
            | (SessionState::Paused, SessionEvent::AcquireFailed(err)) => {
                self.error = Some(err.clone());
                self.state
            }

            (SessionState::Deployed, SessionEvent::Pause) => SessionState::Paused,
            (SessionState::Paused, SessionEvent::Resume) => {
                self.error = None;
                SessionState::Deployed
            }

            (SessionState::Deployed, SessionEvent::End) | (SessionState::Paused, SessionEvent::End) => {
                SessionState::NotDeployed
            }

            (state, event) => {
                return Err(DeployError::TransitionError(format!(
                    "{:?} -> {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for SessionFsm {
    fn default() -> Self {
        Self::new()
    }
}
