use std::collections::HashMap;

use tokio::sync::RwLock;

use cirrus_core::domain::configuration::Configuration;
use cirrus_core::domain::credentials::Credentials;
use cirrus_core::domain::session::{Session, SessionId, SessionState, UserId};

use super::{
    ConfigurationRepository, CredentialRepository, RepositoryError, SessionRepository,
};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id.0).cloned())
    }

    async fn save(&self, session: Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.0.clone(), session);
        Ok(())
    }

    async fn get_state(&self, id: &SessionId) -> Result<SessionState, RepositoryError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id.0)
            .map(|session| session.state)
            .ok_or_else(|| RepositoryError::SessionNotFound(id.clone()))
    }

    async fn set_state(&self, id: &SessionId, state: SessionState) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let session =
            sessions.get_mut(&id.0).ok_or_else(|| RepositoryError::SessionNotFound(id.clone()))?;
        session.state = state;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConfigurationRepository {
    configurations: RwLock<HashMap<String, Configuration>>,
}

#[async_trait::async_trait]
impl ConfigurationRepository for InMemoryConfigurationRepository {
    async fn get_configuration(&self, id: &SessionId) -> Result<Configuration, RepositoryError> {
        let configurations = self.configurations.read().await;
        configurations
            .get(&id.0)
            .cloned()
            .ok_or_else(|| RepositoryError::ConfigurationNotFound(id.clone()))
    }

    async fn replace_configuration(
        &self,
        id: &SessionId,
        configuration: Configuration,
    ) -> Result<(), RepositoryError> {
        let mut configurations = self.configurations.write().await;
        configurations.insert(id.0.clone(), configuration);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCredentialRepository {
    credentials: RwLock<HashMap<String, Credentials>>,
}

#[async_trait::async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn get_credentials(&self, user_id: &UserId) -> Result<Credentials, RepositoryError> {
        let credentials = self.credentials.read().await;
        credentials
            .get(&user_id.0)
            .cloned()
            .ok_or_else(|| RepositoryError::CredentialsNotFound(user_id.clone()))
    }

    async fn save_credentials(
        &self,
        user_id: &UserId,
        credentials: Credentials,
    ) -> Result<(), RepositoryError> {
        let mut stored = self.credentials.write().await;
        stored.insert(user_id.0.clone(), credentials);
        Ok(())
    }
}
