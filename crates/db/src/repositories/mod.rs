use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use cirrus_core::domain::configuration::Configuration;
use cirrus_core::domain::credentials::Credentials;
use cirrus_core::domain::session::{Session, SessionId, SessionState, UserId};

pub mod configuration;
pub mod credentials;
pub mod memory;
pub mod session;

pub use configuration::SqlConfigurationRepository;
pub use credentials::SqlCredentialRepository;
pub use memory::{
    InMemoryConfigurationRepository, InMemoryCredentialRepository, InMemorySessionRepository,
};
pub use session::SqlSessionRepository;

use crate::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("session `{0}` does not exist")]
    SessionNotFound(SessionId),
    #[error("no configuration stored for session `{0}`")]
    ConfigurationNotFound(SessionId),
    #[error("no credentials stored for user `{0}`")]
    CredentialsNotFound(UserId),
}

impl RepositoryError {
    pub fn is_configuration_not_found(&self) -> bool {
        matches!(self, Self::ConfigurationNotFound(_))
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError>;
    async fn save(&self, session: Session) -> Result<(), RepositoryError>;
    async fn get_state(&self, id: &SessionId) -> Result<SessionState, RepositoryError>;
    async fn set_state(&self, id: &SessionId, state: SessionState) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConfigurationRepository: Send + Sync {
    /// Fails with `ConfigurationNotFound` when the session has none yet.
    async fn get_configuration(&self, id: &SessionId) -> Result<Configuration, RepositoryError>;

    /// Replaces the stored document in one step; readers never observe a mix of
    /// the old and new configuration.
    async fn replace_configuration(
        &self,
        id: &SessionId,
        configuration: Configuration,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn get_credentials(&self, user_id: &UserId) -> Result<Credentials, RepositoryError>;
    async fn save_credentials(
        &self,
        user_id: &UserId,
        credentials: Credentials,
    ) -> Result<(), RepositoryError>;
}

/// The persistence collaborators a request needs, behind trait objects so the
/// routing core never depends on a concrete backend.
#[derive(Clone)]
pub struct SessionStore {
    pub sessions: Arc<dyn SessionRepository>,
    pub configurations: Arc<dyn ConfigurationRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
}

impl SessionStore {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            sessions: Arc::new(SqlSessionRepository::new(pool.clone())),
            configurations: Arc::new(SqlConfigurationRepository::new(pool.clone())),
            credentials: Arc::new(SqlCredentialRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionRepository::default()),
            configurations: Arc::new(InMemoryConfigurationRepository::default()),
            credentials: Arc::new(InMemoryCredentialRepository::default()),
        }
    }
}
