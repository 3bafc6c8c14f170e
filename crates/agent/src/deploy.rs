use std::sync::Arc;

use async_trait::async_trait;
use tera::Context;
use thiserror::Error;
use tracing::{info, warn};

use cirrus_core::audit::{AuditContext, AuditSink};
use cirrus_core::domain::configuration::Configuration;
use cirrus_core::domain::credentials::Credentials;
use cirrus_core::domain::session::{SessionId, SessionState, UserId};
use cirrus_core::errors::{ApplicationError, DomainError};
use cirrus_core::flows::{SessionEvent, SessionFlow};
use cirrus_core::ledger::CommandRecord;
use cirrus_db::{RepositoryError, SessionStore};

use crate::executor::{CommandEngine, EngineSettings, ExecutionError};
use crate::llm::{GenerationError, TextGenerator};
use crate::orchestration::{record_transition, TransitionError};
use crate::process::ProcessRunner;
use crate::prompts::{PromptLibrary, PromptTemplate};
use crate::refine::{ExecutionAction, ResponseRefiner};

#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentReport {
    pub summary: String,
    pub commands: Vec<CommandRecord>,
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("session `{session_id}` does not belong to user `{user_id}`")]
    ForeignSession { session_id: SessionId, user_id: UserId },
    #[error("session `{session_id}` is {state:?} and cannot be deployed")]
    NotDeployable { session_id: SessionId, state: SessionState },
    #[error("session `{0}` has no configuration to deploy")]
    ConfigurationMissing(SessionId),
    #[error("user `{0}` has no stored credentials")]
    CredentialsMissing(UserId),
    #[error("store failure: {0}")]
    Store(#[source] RepositoryError),
    #[error("deployment instruction could not be prepared: {0}")]
    Instruction(#[source] GenerationError),
    #[error("deployment failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<DeployError> for ApplicationError {
    fn from(value: DeployError) -> Self {
        match value {
            DeployError::ForeignSession { .. }
            | DeployError::NotDeployable { .. }
            | DeployError::ConfigurationMissing(_)
            | DeployError::CredentialsMissing(_) => {
                Self::Domain(DomainError::InvariantViolation(value.to_string()))
            }
            DeployError::Store(RepositoryError::SessionNotFound(id)) => {
                Self::Domain(DomainError::InvariantViolation(format!("unknown session `{id}`")))
            }
            DeployError::Store(error) => Self::Persistence(error.to_string()),
            DeployError::Instruction(error) => Self::Integration(error.to_string()),
            DeployError::Execution(error) => Self::Execution(error.to_string()),
            DeployError::Transition(TransitionError::Rejected(error)) => {
                Self::Domain(DomainError::FlowTransition(error))
            }
            DeployError::Transition(TransitionError::Persistence(error)) => {
                Self::Persistence(error.to_string())
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeploymentRequest {
    pub session_id: SessionId,
    pub configuration: Configuration,
    pub credentials: Credentials,
    pub audit: AuditContext,
}

/// Puts a configuration into the user's cloud account.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, request: DeploymentRequest) -> Result<DeploymentReport, DeployError>;
}

/// Deploys by asking the command engine for the provider commands that create
/// the configured resources.
pub struct CommandDeployer {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<PromptLibrary>,
    runner: Arc<dyn ProcessRunner>,
    settings: EngineSettings,
    audit_sink: Arc<dyn AuditSink>,
}

impl CommandDeployer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        prompts: Arc<PromptLibrary>,
        runner: Arc<dyn ProcessRunner>,
        settings: EngineSettings,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self { generator, prompts, runner, settings, audit_sink }
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn deploy(&self, request: DeploymentRequest) -> Result<DeploymentReport, DeployError> {
        let mut context = Context::new();
        context.insert("configuration", &request.configuration.to_pretty_json());
        let instruction = self
            .prompts
            .render(PromptTemplate::DeployConfiguration, &context)
            .map_err(|error| DeployError::Instruction(error.into()))?;

        let engine = CommandEngine::new(
            self.generator.clone(),
            self.prompts.clone(),
            self.runner.clone(),
            request.credentials,
            self.settings.clone(),
        )
        .with_audit(self.audit_sink.clone(), request.audit);
        let mut action = ExecutionAction::new(
            engine,
            ResponseRefiner::new(self.generator.clone(), self.prompts.clone()),
        );

        let summary = action.trigger(&instruction).await?;
        let commands = action.into_engine().ledger().entries().to_vec();
        Ok(DeploymentReport { summary, commands })
    }
}

/// Deployment entry point exposed to transports.
pub struct DeploymentService {
    store: SessionStore,
    deployer: Arc<dyn Deployer>,
    flow: SessionFlow,
    audit_sink: Arc<dyn AuditSink>,
}

impl DeploymentService {
    pub fn new(
        store: SessionStore,
        deployer: Arc<dyn Deployer>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self { store, deployer, flow: SessionFlow::new(), audit_sink }
    }

    pub async fn deploy(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        audit: &AuditContext,
    ) -> Result<DeploymentReport, DeployError> {
        let session = self
            .store
            .sessions
            .find_by_id(session_id)
            .await
            .map_err(DeployError::Store)?
            .ok_or_else(|| {
                DeployError::Store(RepositoryError::SessionNotFound(session_id.clone()))
            })?;
        if session.user_id != *user_id {
            warn!(
                event_name = "deployment.foreign_session",
                correlation_id = %audit.correlation_id,
                session_id = %session_id,
                user_id = %user_id,
                "session belongs to another user"
            );
            return Err(DeployError::ForeignSession {
                session_id: session_id.clone(),
                user_id: user_id.clone(),
            });
        }

        let state = session.state;
        if state != SessionState::Queried {
            warn!(
                event_name = "deployment.rejected",
                correlation_id = %audit.correlation_id,
                session_id = %session_id,
                state = state.as_str(),
                "session is not deployable"
            );
            return Err(DeployError::NotDeployable { session_id: session_id.clone(), state });
        }

        let configuration = match self.store.configurations.get_configuration(session_id).await {
            Ok(configuration) => configuration,
            Err(RepositoryError::ConfigurationNotFound(id)) => {
                return Err(DeployError::ConfigurationMissing(id))
            }
            Err(error) => return Err(DeployError::Store(error)),
        };
        let credentials = match self.store.credentials.get_credentials(user_id).await {
            Ok(credentials) => credentials,
            Err(RepositoryError::CredentialsNotFound(id)) => {
                return Err(DeployError::CredentialsMissing(id))
            }
            Err(error) => return Err(DeployError::Store(error)),
        };

        let report = self
            .deployer
            .deploy(DeploymentRequest {
                session_id: session_id.clone(),
                configuration,
                credentials,
                audit: audit.clone(),
            })
            .await?;

        record_transition(
            &self.store,
            &self.flow,
            self.audit_sink.as_ref(),
            audit,
            session_id,
            state,
            SessionEvent::DeploymentSucceeded,
        )
        .await?;

        info!(
            event_name = "deployment.completed",
            correlation_id = %audit.correlation_id,
            session_id = %session_id,
            user_id = %user_id,
            commands = report.commands.len(),
            "configuration deployed"
        );
        Ok(report)
    }
}
