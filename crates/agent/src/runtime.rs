use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use cirrus_core::audit::{AuditContext, AuditSink};
use cirrus_core::config::AppConfig;
use cirrus_core::domain::session::{Session, SessionId, UserId};
use cirrus_db::SessionStore;

use crate::audit::TracingAuditSink;
use crate::deploy::{CommandDeployer, DeployError, DeploymentReport, DeploymentService};
use crate::executor::EngineSettings;
use crate::llm::{GenerationError, HttpTextGenerator, TextGenerator};
use crate::process::{ProcessRunner, SystemProcessRunner};
use crate::prompts::{PromptError, PromptLibrary};
use crate::router::{IntentRouter, RouteError, RouteOutcome};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Prompts(#[from] PromptError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// The two operations a transport can invoke: handle a user message and
/// trigger a deployment. Either may run inline or on a spawned task.
pub struct AgentRuntime {
    store: SessionStore,
    router: IntentRouter,
    deployments: DeploymentService,
}

impl AgentRuntime {
    pub fn from_config(config: &AppConfig, store: SessionStore) -> Result<Self, RuntimeError> {
        let generator: Arc<dyn TextGenerator> =
            Arc::new(HttpTextGenerator::from_config(&config.llm)?);
        let prompts = Arc::new(PromptLibrary::from_config(&config.prompts)?);

        Ok(Self::new(
            store,
            generator,
            prompts,
            Arc::new(SystemProcessRunner),
            EngineSettings::from_config(&config.executor),
            Arc::new(TracingAuditSink),
        ))
    }

    pub fn new(
        store: SessionStore,
        generator: Arc<dyn TextGenerator>,
        prompts: Arc<PromptLibrary>,
        runner: Arc<dyn ProcessRunner>,
        settings: EngineSettings,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        let deployer = CommandDeployer::new(
            generator.clone(),
            prompts.clone(),
            runner,
            settings,
            audit_sink.clone(),
        );

        Self {
            router: IntentRouter::new(store.clone(), generator, prompts, audit_sink.clone()),
            deployments: DeploymentService::new(store.clone(), Arc::new(deployer), audit_sink),
            store,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Routes `instruction` for the session, registering the session first if
    /// the transport has never seen it. Sessions owned by another user are refused.
    pub async fn handle_message(
        &self,
        instruction: &str,
        user_id: &UserId,
        session_id: &SessionId,
        correlation_id: &str,
    ) -> Result<RouteOutcome, RouteError> {
        self.ensure_session(user_id, session_id, correlation_id).await?;

        let audit = AuditContext::new(Some(session_id.clone()), correlation_id, user_id.0.clone());
        self.router.route(instruction, session_id, &audit).await
    }

    pub async fn trigger_deployment(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        correlation_id: &str,
    ) -> Result<DeploymentReport, DeployError> {
        let audit = AuditContext::new(Some(session_id.clone()), correlation_id, user_id.0.clone());
        self.deployments.deploy(user_id, session_id, &audit).await
    }

    async fn ensure_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        correlation_id: &str,
    ) -> Result<(), RouteError> {
        let existing =
            self.store.sessions.find_by_id(session_id).await.map_err(RouteError::SessionState)?;
        match existing {
            Some(session) if session.user_id == *user_id => return Ok(()),
            Some(_) => {
                warn!(
                    event_name = "session.foreign_access",
                    correlation_id,
                    session_id = %session_id,
                    user_id = %user_id,
                    "session belongs to another user"
                );
                return Err(RouteError::ForeignSession {
                    session_id: session_id.clone(),
                    user_id: user_id.clone(),
                });
            }
            None => {}
        }

        self.store
            .sessions
            .save(Session::new(session_id.clone(), user_id.clone()))
            .await
            .map_err(RouteError::SessionState)?;
        info!(
            event_name = "session.registered",
            correlation_id,
            session_id = %session_id,
            user_id = %user_id,
            "registered new session"
        );
        Ok(())
    }
}
