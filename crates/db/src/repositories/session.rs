use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use cirrus_core::domain::session::{Session, SessionId, SessionState, UserId};

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_state(value: &str) -> Result<SessionState, RepositoryError> {
    SessionState::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown session state `{value}`")))
}

fn row_to_session(row: &SqliteRow) -> Result<Session, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_id: String =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let state: String = row.try_get("state").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Session { id: SessionId(id), user_id: UserId(user_id), state: parse_state(&state)? })
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query("SELECT id, user_id, state FROM chat_session WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn save(&self, session: Session) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO chat_session (id, user_id, state, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                state = excluded.state,
                updated_at = excluded.updated_at",
        )
        .bind(&session.id.0)
        .bind(&session.user_id.0)
        .bind(session.state.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_state(&self, id: &SessionId) -> Result<SessionState, RepositoryError> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM chat_session WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        match state {
            Some(value) => parse_state(&value),
            None => Err(RepositoryError::SessionNotFound(id.clone())),
        }
    }

    async fn set_state(&self, id: &SessionId, state: SessionState) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE chat_session SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::SessionNotFound(id.clone()));
        }
        Ok(())
    }
}
