use chrono::Utc;
use secrecy::ExposeSecret;
use sqlx::Row;

use cirrus_core::domain::credentials::Credentials;
use cirrus_core::domain::session::UserId;

use super::{CredentialRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCredentialRepository {
    pool: DbPool,
}

impl SqlCredentialRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CredentialRepository for SqlCredentialRepository {
    async fn get_credentials(&self, user_id: &UserId) -> Result<Credentials, RepositoryError> {
        let row = sqlx::query(
            "SELECT access_key_id, secret_access_key, profile FROM user_credentials WHERE user_id = ?",
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(RepositoryError::CredentialsNotFound(user_id.clone()));
        };

        let access_key_id: String =
            row.try_get("access_key_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let secret_access_key: String = row
            .try_get("secret_access_key")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let profile: String =
            row.try_get("profile").map_err(|e| RepositoryError::Decode(e.to_string()))?;

        Ok(Credentials::new(access_key_id, secret_access_key, profile))
    }

    async fn save_credentials(
        &self,
        user_id: &UserId,
        credentials: Credentials,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_credentials (user_id, access_key_id, secret_access_key, profile, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                access_key_id = excluded.access_key_id,
                secret_access_key = excluded.secret_access_key,
                profile = excluded.profile,
                updated_at = excluded.updated_at",
        )
        .bind(&user_id.0)
        .bind(&credentials.access_key_id)
        .bind(credentials.secret_access_key.expose_secret())
        .bind(&credentials.profile)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
