use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use cirrus_db::DbPool;
use serde::Serialize;

const SESSION_TABLES: [&str; 3] = ["chat_session", "session_configuration", "user_credentials"];

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub component: &'static str,
    pub readiness: Readiness,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub readiness: Readiness,
    pub components: Vec<ComponentHealth>,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

/// Ready only when the session store answers and its schema is migrated.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let components = vec![session_store(&state.db_pool).await, session_schema(&state.db_pool).await];
    let readiness = if components.iter().all(|check| check.readiness == Readiness::Ready) {
        Readiness::Ready
    } else {
        Readiness::Degraded
    };

    let status_code = match readiness {
        Readiness::Ready => StatusCode::OK,
        Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(HealthReport { readiness, components, checked_at: Utc::now().to_rfc3339() }))
}

async fn session_store(pool: &DbPool) -> ComponentHealth {
    let (readiness, detail) = match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => (Readiness::Ready, "session store reachable".to_string()),
        Err(error) => (Readiness::Degraded, format!("session store unreachable: {error}")),
    };
    ComponentHealth { component: "session_store", readiness, detail }
}

async fn session_schema(pool: &DbPool) -> ComponentHealth {
    let present = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?, ?, ?)",
    )
    .bind(SESSION_TABLES[0])
    .bind(SESSION_TABLES[1])
    .bind(SESSION_TABLES[2])
    .fetch_one(pool)
    .await;

    let (readiness, detail) = match present {
        Ok(count) if count == SESSION_TABLES.len() as i64 => {
            (Readiness::Ready, "session tables migrated".to_string())
        }
        Ok(count) => (
            Readiness::Degraded,
            format!("{count} of {} session tables present; run migrations", SESSION_TABLES.len()),
        ),
        Err(error) => (Readiness::Degraded, format!("schema lookup failed: {error}")),
    };
    ComponentHealth { component: "session_schema", readiness, detail }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use cirrus_db::{connect_with_settings, migrations};

    use super::{health, HealthState, Readiness};

    #[tokio::test]
    async fn migrated_store_is_ready() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");

        let (status, Json(report)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.readiness, Readiness::Ready);
        assert!(report.components.iter().all(|check| check.readiness == Readiness::Ready));

        pool.close().await;
    }

    #[tokio::test]
    async fn unmigrated_store_asks_for_migrations() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");

        let (status, Json(report)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.readiness, Readiness::Degraded);
        let schema = &report.components[1];
        assert_eq!(schema.component, "session_schema");
        assert!(schema.detail.contains("run migrations"));
        assert_eq!(report.components[0].readiness, Readiness::Ready);

        pool.close().await;
    }

    #[tokio::test]
    async fn closed_pool_degrades_every_component() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        pool.close().await;

        let (status, Json(report)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(report.components.iter().all(|check| check.readiness == Readiness::Degraded));
        assert!(report.components[0].detail.starts_with("session store unreachable"));
    }
}
