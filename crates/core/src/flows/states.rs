use serde::{Deserialize, Serialize};

use crate::domain::session::SessionState;

/// Outcomes that move a session between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    ConstructionSucceeded,
    ConstructionFailed,
    EditSucceeded,
    EditFailed,
    /// Reported by the deployment collaborator, never by message routing.
    DeploymentSucceeded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: SessionState,
    pub to: SessionState,
    pub event: SessionEvent,
}
