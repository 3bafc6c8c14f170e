use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::session::SessionState;
use crate::flows::states::{SessionEvent, TransitionOutcome};

/// Session lifecycle:
///
/// ```text
/// NotQueried --ConstructionSucceeded--> Queried
/// NotQueried --ConstructionFailed-----> QueriedNotDeployable
/// Queried | QueriedNotDeployable | Deployed --EditSucceeded--> Queried
/// Queried | QueriedNotDeployable | Deployed --EditFailed-----> QueriedNotDeployable
/// Queried --DeploymentSucceeded--> Deployed
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionFlow;

impl SessionFlow {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self) -> SessionState {
        SessionState::NotQueried
    }

    pub fn apply(
        &self,
        current: SessionState,
        event: SessionEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use SessionEvent::{
            ConstructionFailed, ConstructionSucceeded, DeploymentSucceeded, EditFailed,
            EditSucceeded,
        };
        use SessionState::{Deployed, NotQueried, Queried, QueriedNotDeployable};

        let to = match (current, event) {
            (NotQueried, ConstructionSucceeded) => Queried,
            (NotQueried, ConstructionFailed) => QueriedNotDeployable,
            (Queried | QueriedNotDeployable | Deployed, EditSucceeded) => Queried,
            (Queried | QueriedNotDeployable | Deployed, EditFailed) => QueriedNotDeployable,
            (Queried, DeploymentSucceeded) => Deployed,
            _ => return Err(FlowTransitionError::InvalidTransition { state: current, event }),
        };

        Ok(TransitionOutcome { from: current, to, event })
    }

    pub fn apply_with_audit<S>(
        &self,
        current: SessionState,
        event: SessionEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "session.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "session.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid session transition from {state:?} using event {event:?}")]
    InvalidTransition { state: SessionState, event: SessionEvent },
}
