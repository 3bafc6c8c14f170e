use chrono::Utc;

use cirrus_core::domain::configuration::Configuration;
use cirrus_core::domain::session::SessionId;

use super::{ConfigurationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConfigurationRepository {
    pool: DbPool,
}

impl SqlConfigurationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn version(&self, id: &SessionId) -> Result<Option<i64>, RepositoryError> {
        let version = sqlx::query_scalar(
            "SELECT version FROM session_configuration WHERE session_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(version)
    }
}

#[async_trait::async_trait]
impl ConfigurationRepository for SqlConfigurationRepository {
    async fn get_configuration(&self, id: &SessionId) -> Result<Configuration, RepositoryError> {
        let document: Option<String> = sqlx::query_scalar(
            "SELECT configuration_json FROM session_configuration WHERE session_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(document) = document else {
            return Err(RepositoryError::ConfigurationNotFound(id.clone()));
        };

        serde_json::from_str(&document).map_err(|error| {
            RepositoryError::Decode(format!("configuration for session `{id}`: {error}"))
        })
    }

    async fn replace_configuration(
        &self,
        id: &SessionId,
        configuration: Configuration,
    ) -> Result<(), RepositoryError> {
        let document = serde_json::to_string(&configuration)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        // Single statement, so the swap is atomic for concurrent readers.
        sqlx::query(
            "INSERT INTO session_configuration (session_id, name, configuration_json, version, updated_at)
             VALUES (?, ?, ?, 1, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                name = excluded.name,
                configuration_json = excluded.configuration_json,
                version = session_configuration.version + 1,
                updated_at = excluded.updated_at",
        )
        .bind(&id.0)
        .bind(&configuration.name)
        .bind(document)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use cirrus_core::domain::configuration::{Configuration, ResourceDeclaration};
    use cirrus_core::domain::session::{Session, SessionId, UserId};

    use super::SqlConfigurationRepository;
    use crate::repositories::{
        ConfigurationRepository, RepositoryError, SessionRepository, SqlSessionRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    async fn insert_session(pool: &DbPool, id: &SessionId) {
        SqlSessionRepository::new(pool.clone())
            .save(Session::new(id.clone(), UserId("U-1".to_string())))
            .await
            .expect("insert session");
    }

    #[tokio::test]
    async fn sql_configuration_is_replaced_wholesale() {
        let pool = setup_pool().await;
        let id = SessionId("S-1".to_string());
        insert_session(&pool, &id).await;
        let repo = SqlConfigurationRepository::new(pool.clone());

        let original = Configuration::new("logs").with_resource(ResourceDeclaration {
            resource_type: "aws_s3_bucket".to_string(),
            name: "logs".to_string(),
            properties: json!({ "bucket": "logs" }),
        });
        repo.replace_configuration(&id, original.clone()).await.expect("store");
        assert_eq!(repo.get_configuration(&id).await.expect("get"), original);
        assert_eq!(repo.version(&id).await.expect("version"), Some(1));

        let replacement = Configuration::new("logs").with_resource(ResourceDeclaration {
            resource_type: "aws_s3_bucket_versioning".to_string(),
            name: "logs".to_string(),
            properties: json!({ "status": "Enabled" }),
        });
        repo.replace_configuration(&id, replacement.clone()).await.expect("replace");

        let stored = repo.get_configuration(&id).await.expect("get");
        assert_eq!(stored, replacement);
        assert!(stored.resource("aws_s3_bucket", "logs").is_none());
        assert_eq!(repo.version(&id).await.expect("version"), Some(2));

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_configuration_missing_is_typed() {
        let pool = setup_pool().await;
        let repo = SqlConfigurationRepository::new(pool.clone());

        let error = repo
            .get_configuration(&SessionId("S-none".to_string()))
            .await
            .expect_err("nothing stored");
        assert!(matches!(error, RepositoryError::ConfigurationNotFound(_)));

        pool.close().await;
    }
}
