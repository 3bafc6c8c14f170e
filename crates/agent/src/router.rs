use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use cirrus_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use cirrus_core::domain::session::{SessionId, SessionState, UserId};
use cirrus_core::errors::{ApplicationError, DomainError};
use cirrus_db::{RepositoryError, SessionStore};

use crate::intent::{GeneralResponder, IntentClassifier, MessageIntent};
use crate::llm::{GenerationError, TextGenerator};
use crate::orchestration::{
    ConfigurationOrchestrator, ConstructionOutcome, EditOutcome, TransitionError,
};
use crate::prompts::PromptLibrary;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Constructed { response: String },
    Edited { response: String },
    Answered { response: String },
    /// The request was handled but there is nothing to tell the user.
    NoResponse,
}

impl RouteOutcome {
    pub fn response(&self) -> Option<&str> {
        match self {
            Self::Constructed { response }
            | Self::Edited { response }
            | Self::Answered { response } => Some(response),
            Self::NoResponse => None,
        }
    }

    pub fn into_response(self) -> Option<String> {
        match self {
            Self::Constructed { response }
            | Self::Edited { response }
            | Self::Answered { response } => Some(response),
            Self::NoResponse => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Constructed { .. } => "constructed",
            Self::Edited { .. } => "edited",
            Self::Answered { .. } => "answered",
            Self::NoResponse => "no_response",
        }
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("session `{session_id}` does not belong to user `{user_id}`")]
    ForeignSession { session_id: SessionId, user_id: UserId },
    #[error("session state unavailable: {0}")]
    SessionState(#[source] RepositoryError),
    #[error("intent classification failed: {0}")]
    Classification(#[source] GenerationError),
    #[error("generic response failed: {0}")]
    Response(#[source] GenerationError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<RouteError> for ApplicationError {
    fn from(value: RouteError) -> Self {
        match value {
            RouteError::ForeignSession { .. } => {
                Self::Domain(DomainError::InvariantViolation(value.to_string()))
            }
            RouteError::SessionState(RepositoryError::SessionNotFound(id)) => {
                Self::Domain(DomainError::InvariantViolation(format!("unknown session `{id}`")))
            }
            RouteError::SessionState(error) => Self::Persistence(error.to_string()),
            RouteError::Classification(error) | RouteError::Response(error) => {
                Self::Integration(error.to_string())
            }
            RouteError::Transition(TransitionError::Rejected(error)) => {
                Self::Domain(DomainError::FlowTransition(error))
            }
            RouteError::Transition(TransitionError::Persistence(error)) => {
                Self::Persistence(error.to_string())
            }
        }
    }
}

/// Decides what a message means for its session and dispatches it.
///
/// A fresh session can only be constructed; any later message is an edit of
/// the stored configuration. Messages that are neither get a generic answer.
/// Deployment is never triggered from here.
pub struct IntentRouter {
    store: SessionStore,
    classifier: IntentClassifier,
    responder: GeneralResponder,
    orchestrator: ConfigurationOrchestrator,
    audit_sink: Arc<dyn AuditSink>,
}

impl IntentRouter {
    pub fn new(
        store: SessionStore,
        generator: Arc<dyn TextGenerator>,
        prompts: Arc<PromptLibrary>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(generator.clone(), prompts.clone()),
            responder: GeneralResponder::new(generator.clone(), prompts.clone()),
            orchestrator: ConfigurationOrchestrator::new(
                generator,
                prompts,
                store.clone(),
                audit_sink.clone(),
            ),
            store,
            audit_sink,
        }
    }

    pub async fn route(
        &self,
        message: &str,
        session_id: &SessionId,
        audit: &AuditContext,
    ) -> Result<RouteOutcome, RouteError> {
        let state =
            self.store.sessions.get_state(session_id).await.map_err(RouteError::SessionState)?;

        let outcome = match state {
            SessionState::NotQueried => {
                let intent =
                    self.classifier.classify(message).await.map_err(RouteError::Classification)?;
                match intent {
                    MessageIntent::Construct => {
                        match self.orchestrator.construct(session_id, state, message, audit).await? {
                            ConstructionOutcome::Constructed { response, .. } => {
                                RouteOutcome::Constructed { response }
                            }
                            ConstructionOutcome::Failed(_) => RouteOutcome::NoResponse,
                        }
                    }
                    MessageIntent::Other => self.answer(message).await?,
                }
            }
            SessionState::Queried | SessionState::QueriedNotDeployable | SessionState::Deployed => {
                match self.orchestrator.edit(session_id, state, message, audit).await? {
                    EditOutcome::Edited { response, .. } => RouteOutcome::Edited { response },
                    EditOutcome::NotApplicable => self.answer(message).await?,
                    EditOutcome::Failed(_) => RouteOutcome::NoResponse,
                }
            }
        };

        info!(
            event_name = "route.completed",
            correlation_id = %audit.correlation_id,
            session_id = %session_id,
            state = state.as_str(),
            outcome = outcome.kind(),
            "message routed"
        );
        self.audit_sink.emit(
            AuditEvent::from_context(
                audit,
                "route.completed",
                AuditCategory::Routing,
                AuditOutcome::Success,
            )
            .with_metadata("state", state.as_str())
            .with_metadata("outcome", outcome.kind()),
        );
        Ok(outcome)
    }

    async fn answer(&self, message: &str) -> Result<RouteOutcome, RouteError> {
        let response = self.responder.answer(message).await.map_err(RouteError::Response)?;
        Ok(RouteOutcome::Answered { response })
    }
}
