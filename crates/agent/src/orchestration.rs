//! Construction and edit of a session's configuration.
//!
//! Each attempt yields a typed outcome. The session event is derived from that
//! outcome and applied in exactly one place, [`ConfigurationOrchestrator::settle`],
//! whether the attempt succeeded or not.

use std::sync::Arc;

use tera::Context;
use thiserror::Error;
use tracing::{error, info, warn};

use cirrus_core::audit::{AuditContext, AuditSink};
use cirrus_core::domain::configuration::Configuration;
use cirrus_core::domain::session::{SessionId, SessionState};
use cirrus_core::errors::DomainError;
use cirrus_core::flows::{FlowTransitionError, SessionEvent, SessionFlow, TransitionOutcome};
use cirrus_db::{RepositoryError, SessionStore};

use crate::llm::{GenerationError, GenerationRequest, TextGenerator};
use crate::prompts::{PromptLibrary, PromptTemplate};

const CONFIGURATION_TEMPERATURE: f32 = 0.2;
const SUMMARY_TEMPERATURE: f32 = 0.4;

#[derive(Debug, Error)]
pub enum OrchestrationFailure {
    #[error("text generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("generated configuration is unusable: {0}")]
    InvalidConfiguration(#[from] DomainError),
    #[error("configuration store failed: {0}")]
    Persistence(#[from] RepositoryError),
}

#[derive(Debug)]
pub enum ConstructionOutcome {
    Constructed { configuration: Configuration, response: String },
    Failed(OrchestrationFailure),
}

impl ConstructionOutcome {
    pub fn session_event(&self) -> SessionEvent {
        match self {
            Self::Constructed { .. } => SessionEvent::ConstructionSucceeded,
            Self::Failed(_) => SessionEvent::ConstructionFailed,
        }
    }
}

#[derive(Debug)]
pub enum EditOutcome {
    Edited { configuration: Configuration, response: String },
    /// The session has no configuration to edit; the caller should fall back.
    NotApplicable,
    Failed(OrchestrationFailure),
}

impl EditOutcome {
    /// `None` leaves the session state untouched.
    pub fn session_event(&self) -> Option<SessionEvent> {
        match self {
            Self::Edited { .. } => Some(SessionEvent::EditSucceeded),
            Self::NotApplicable => None,
            Self::Failed(_) => Some(SessionEvent::EditFailed),
        }
    }
}

/// A session transition that could not be applied. Always fatal for the request.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error(transparent)]
    Rejected(#[from] FlowTransitionError),
    #[error("failed to persist session state: {0}")]
    Persistence(#[source] RepositoryError),
}

/// Validates `event` against the session flow, then persists the new state.
pub async fn record_transition(
    store: &SessionStore,
    flow: &SessionFlow,
    sink: &dyn AuditSink,
    audit: &AuditContext,
    session_id: &SessionId,
    from: SessionState,
    event: SessionEvent,
) -> Result<TransitionOutcome, TransitionError> {
    let outcome = flow.apply_with_audit(from, event, sink, audit)?;

    if let Err(source) = store.sessions.set_state(session_id, outcome.to).await {
        error!(
            event_name = "session.state_persist_failed",
            correlation_id = %audit.correlation_id,
            session_id = %session_id,
            to = outcome.to.as_str(),
            error = %source,
            "failed to persist session state"
        );
        return Err(TransitionError::Persistence(source));
    }

    info!(
        event_name = "session.state_changed",
        correlation_id = %audit.correlation_id,
        session_id = %session_id,
        from = outcome.from.as_str(),
        to = outcome.to.as_str(),
        "session state changed"
    );
    Ok(outcome)
}

pub struct ConfigurationOrchestrator {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<PromptLibrary>,
    store: SessionStore,
    flow: SessionFlow,
    audit_sink: Arc<dyn AuditSink>,
}

impl ConfigurationOrchestrator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        prompts: Arc<PromptLibrary>,
        store: SessionStore,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self { generator, prompts, store, flow: SessionFlow::new(), audit_sink }
    }

    /// First-time construction from a session in state `from`.
    pub async fn construct(
        &self,
        session_id: &SessionId,
        from: SessionState,
        instruction: &str,
        audit: &AuditContext,
    ) -> Result<ConstructionOutcome, TransitionError> {
        let outcome = match self.attempt_construction(session_id, instruction).await {
            Ok((configuration, response)) => {
                ConstructionOutcome::Constructed { configuration, response }
            }
            Err(failure) => {
                warn!(
                    event_name = "configuration.construction_failed",
                    correlation_id = %audit.correlation_id,
                    session_id = %session_id,
                    instruction,
                    error = %failure,
                    "failed to construct configuration"
                );
                ConstructionOutcome::Failed(failure)
            }
        };

        self.settle(session_id, from, Some(outcome.session_event()), audit).await?;
        Ok(outcome)
    }

    /// Replaces the session's configuration according to `instruction`.
    pub async fn edit(
        &self,
        session_id: &SessionId,
        from: SessionState,
        instruction: &str,
        audit: &AuditContext,
    ) -> Result<EditOutcome, TransitionError> {
        let outcome = match self.attempt_edit(session_id, instruction).await {
            Ok(Some((configuration, response))) => EditOutcome::Edited { configuration, response },
            Ok(None) => {
                warn!(
                    event_name = "session.inconsistent_state",
                    correlation_id = %audit.correlation_id,
                    session_id = %session_id,
                    state = from.as_str(),
                    "session has been queried but holds no configuration"
                );
                EditOutcome::NotApplicable
            }
            Err(failure) => {
                warn!(
                    event_name = "configuration.edit_failed",
                    correlation_id = %audit.correlation_id,
                    session_id = %session_id,
                    instruction,
                    error = %failure,
                    "failed to edit configuration"
                );
                EditOutcome::Failed(failure)
            }
        };

        self.settle(session_id, from, outcome.session_event(), audit).await?;
        Ok(outcome)
    }

    async fn settle(
        &self,
        session_id: &SessionId,
        from: SessionState,
        event: Option<SessionEvent>,
        audit: &AuditContext,
    ) -> Result<(), TransitionError> {
        let Some(event) = event else {
            return Ok(());
        };
        record_transition(
            &self.store,
            &self.flow,
            self.audit_sink.as_ref(),
            audit,
            session_id,
            from,
            event,
        )
        .await?;
        Ok(())
    }

    async fn attempt_construction(
        &self,
        session_id: &SessionId,
        instruction: &str,
    ) -> Result<(Configuration, String), OrchestrationFailure> {
        let mut context = Context::new();
        context.insert("instruction", instruction);
        let configuration =
            self.generate_configuration(PromptTemplate::ConstructConfiguration, &context).await?;
        let response = self.summarize(&configuration, instruction).await?;

        self.store.configurations.replace_configuration(session_id, configuration.clone()).await?;
        Ok((configuration, response))
    }

    async fn attempt_edit(
        &self,
        session_id: &SessionId,
        instruction: &str,
    ) -> Result<Option<(Configuration, String)>, OrchestrationFailure> {
        let current = match self.store.configurations.get_configuration(session_id).await {
            Ok(configuration) => configuration,
            Err(error) if error.is_configuration_not_found() => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let mut context = Context::new();
        context.insert("instruction", instruction);
        context.insert("configuration", &current.to_pretty_json());
        let replacement =
            self.generate_configuration(PromptTemplate::EditConfiguration, &context).await?;
        let response = self.summarize(&replacement, instruction).await?;

        self.store.configurations.replace_configuration(session_id, replacement.clone()).await?;
        Ok(Some((replacement, response)))
    }

    async fn generate_configuration(
        &self,
        template: PromptTemplate,
        context: &Context,
    ) -> Result<Configuration, OrchestrationFailure> {
        let prompt = self.prompts.render(template, context).map_err(GenerationError::from)?;
        let text = self
            .generator
            .generate(GenerationRequest::structured(prompt, CONFIGURATION_TEMPERATURE))
            .await?;
        Ok(Configuration::from_generated_text(&text)?)
    }

    async fn summarize(
        &self,
        configuration: &Configuration,
        instruction: &str,
    ) -> Result<String, OrchestrationFailure> {
        let mut context = Context::new();
        context.insert("instruction", instruction);
        context.insert("configuration", &configuration.to_pretty_json());
        let prompt = self
            .prompts
            .render(PromptTemplate::SummarizeConfiguration, &context)
            .map_err(GenerationError::from)?;

        Ok(self.generator.generate(GenerationRequest::text(prompt, SUMMARY_TEMPERATURE)).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cirrus_core::audit::{AuditContext, InMemoryAuditSink};
    use cirrus_core::domain::session::{Session, SessionId, SessionState, UserId};
    use cirrus_db::SessionStore;

    use super::{ConfigurationOrchestrator, ConstructionOutcome, EditOutcome, TransitionError};
    use crate::llm::ScriptedTextGenerator;
    use crate::prompts::PromptLibrary;

    const BUCKET: &str = r#"{"name":"logs","resources":[{"resource_type":"aws_s3_bucket","name":"logs","properties":{"bucket":"logs"}}]}"#;

    async fn seeded_store(state: SessionState) -> (SessionStore, SessionId) {
        let store = SessionStore::in_memory();
        let id = SessionId("S-1".to_string());
        let mut session = Session::new(id.clone(), UserId("U-1".to_string()));
        session.state = state;
        store.sessions.save(session).await.expect("seed session");
        (store, id)
    }

    fn orchestrator(
        generator: Arc<ScriptedTextGenerator>,
        store: SessionStore,
        sink: InMemoryAuditSink,
    ) -> ConfigurationOrchestrator {
        ConfigurationOrchestrator::new(
            generator,
            Arc::new(PromptLibrary::builtin().expect("prompts")),
            store,
            Arc::new(sink),
        )
    }

    fn audit() -> AuditContext {
        AuditContext::new(Some(SessionId("S-1".to_string())), "req-1", "U-1")
    }

    #[tokio::test]
    async fn successful_construction_persists_and_marks_queried() {
        let (store, id) = seeded_store(SessionState::NotQueried).await;
        let generator = Arc::new(ScriptedTextGenerator::new([BUCKET, "One S3 bucket named logs."]));
        let sink = InMemoryAuditSink::default();
        let orchestrator = orchestrator(generator.clone(), store.clone(), sink.clone());

        let outcome = orchestrator
            .construct(&id, SessionState::NotQueried, "create an S3 bucket named logs", &audit())
            .await
            .expect("transition");

        assert!(matches!(outcome, ConstructionOutcome::Constructed { ref response, .. } if response == "One S3 bucket named logs."));
        assert_eq!(store.sessions.get_state(&id).await.expect("state"), SessionState::Queried);
        let stored = store.configurations.get_configuration(&id).await.expect("configuration");
        assert!(stored.resource("aws_s3_bucket", "logs").is_some());
        assert!(generator.requests()[0].structured);
        assert_eq!(sink.event_types(), vec!["session.transition_applied"]);
    }

    #[tokio::test]
    async fn failed_construction_marks_not_deployable_and_persists_nothing() {
        let (store, id) = seeded_store(SessionState::NotQueried).await;
        let generator = Arc::new(ScriptedTextGenerator::new(["I cannot help with that"]));
        let orchestrator =
            orchestrator(generator, store.clone(), InMemoryAuditSink::default());

        let outcome = orchestrator
            .construct(&id, SessionState::NotQueried, "create a bucket", &audit())
            .await
            .expect("transition");

        assert!(matches!(outcome, ConstructionOutcome::Failed(_)));
        assert_eq!(
            store.sessions.get_state(&id).await.expect("state"),
            SessionState::QueriedNotDeployable
        );
        assert!(store.configurations.get_configuration(&id).await.is_err());
    }

    #[tokio::test]
    async fn edit_replaces_configuration_and_recovers_state() {
        let (store, id) = seeded_store(SessionState::QueriedNotDeployable).await;
        let original: cirrus_core::Configuration =
            serde_json::from_str(BUCKET).expect("bucket config");
        store.configurations.replace_configuration(&id, original).await.expect("seed config");

        let versioned = r#"{"name":"logs","resources":[
            {"resource_type":"aws_s3_bucket","name":"logs","properties":{"bucket":"logs"}},
            {"resource_type":"aws_s3_bucket_versioning","name":"logs","properties":{"status":"Enabled"}}]}"#;
        let generator = Arc::new(ScriptedTextGenerator::new([versioned, "Versioning enabled."]));
        let orchestrator =
            orchestrator(generator.clone(), store.clone(), InMemoryAuditSink::default());

        let outcome = orchestrator
            .edit(&id, SessionState::QueriedNotDeployable, "add versioning", &audit())
            .await
            .expect("transition");

        assert!(matches!(outcome, EditOutcome::Edited { .. }));
        assert_eq!(store.sessions.get_state(&id).await.expect("state"), SessionState::Queried);
        let stored = store.configurations.get_configuration(&id).await.expect("configuration");
        assert!(stored.resource("aws_s3_bucket_versioning", "logs").is_some());
        assert!(generator.requests()[0].prompt.contains("aws_s3_bucket"));
    }

    #[tokio::test]
    async fn edit_without_configuration_is_not_applicable_and_keeps_state() {
        let (store, id) = seeded_store(SessionState::Queried).await;
        let generator = Arc::new(ScriptedTextGenerator::default());
        let sink = InMemoryAuditSink::default();
        let orchestrator = orchestrator(generator.clone(), store.clone(), sink.clone());

        let outcome = orchestrator
            .edit(&id, SessionState::Queried, "add versioning", &audit())
            .await
            .expect("no transition");

        assert!(matches!(outcome, EditOutcome::NotApplicable));
        assert_eq!(store.sessions.get_state(&id).await.expect("state"), SessionState::Queried);
        assert!(generator.requests().is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn failed_edit_keeps_previous_configuration() {
        let (store, id) = seeded_store(SessionState::Queried).await;
        let original: cirrus_core::Configuration =
            serde_json::from_str(BUCKET).expect("bucket config");
        store.configurations.replace_configuration(&id, original.clone()).await.expect("seed");
        let generator = Arc::new(ScriptedTextGenerator::default());
        generator.push_failure("timeout");
        let orchestrator =
            orchestrator(generator, store.clone(), InMemoryAuditSink::default());

        let outcome = orchestrator
            .edit(&id, SessionState::Queried, "add versioning", &audit())
            .await
            .expect("transition");

        assert!(matches!(outcome, EditOutcome::Failed(_)));
        assert_eq!(
            store.sessions.get_state(&id).await.expect("state"),
            SessionState::QueriedNotDeployable
        );
        assert_eq!(store.configurations.get_configuration(&id).await.expect("config"), original);
    }

    #[tokio::test]
    async fn construction_from_a_queried_session_is_rejected() {
        let (store, id) = seeded_store(SessionState::Queried).await;
        let generator = Arc::new(ScriptedTextGenerator::new([BUCKET, "summary"]));
        let sink = InMemoryAuditSink::default();
        let orchestrator = orchestrator(generator, store, sink.clone());

        let error = orchestrator
            .construct(&id, SessionState::Queried, "create a bucket", &audit())
            .await
            .expect_err("invalid transition");

        assert!(matches!(error, TransitionError::Rejected(_)));
        assert_eq!(sink.event_types(), vec!["session.transition_rejected"]);
    }
}
