use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use cirrus_agent::AgentRuntime;
use cirrus_core::domain::session::{SessionId, UserId};
use cirrus_core::errors::{ApplicationError, DomainError, InterfaceError};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Work started by a request. It outlives the request's connection and is
/// awaited on shutdown.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(work);
    }

    /// Spawns `work` and hands back a receiver for its result. Dropping the
    /// receiver does not cancel the work.
    pub fn run<F, T>(&self, work: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        self.spawn(async move {
            let _ = result_tx.send(work.await);
        });
        result_rx
    }

    /// Waits for every task spawned so far.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.lock());
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                error!(
                    event_name = "api.task_panicked",
                    correlation_id = "shutdown",
                    error = %error,
                    "background task ended abnormally"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<AgentRuntime>,
    tasks: BackgroundTasks,
}

impl ApiState {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime, tasks: BackgroundTasks::default() }
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/query_async", post(query_async))
        .route("/deploy", post(deploy))
        .route("/deploy_async", post(deploy_async))
        .with_state(state)
}

#[derive(Clone, Debug, Deserialize)]
pub struct QueryRequest {
    pub user_query: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub chat_session_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeployRequest {
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub chat_session_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueryResponse {
    pub result: Option<String>,
    pub outcome: &'static str,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeployResponse {
    pub result: String,
    pub commands: Vec<String>,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub correlation_id: String,
}

/// Interface error rendered as a status code plus a user-safe body.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Ids arrive as JSON numbers from some clients and strings from others.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireId {
        Text(String),
        Number(i64),
    }

    Ok(match WireId::deserialize(deserializer)? {
        WireId::Text(text) => text,
        WireId::Number(number) => number.to_string(),
    })
}

fn new_correlation_id() -> String {
    format!("req-{}", Uuid::new_v4())
}

fn identify(
    user_id: &str,
    session_id: &str,
    correlation_id: &str,
) -> Result<(UserId, SessionId), ApiError> {
    if user_id.trim().is_empty() || session_id.trim().is_empty() {
        let error = ApplicationError::Domain(DomainError::InvariantViolation(
            "user_id and chat_session_id must not be blank".to_string(),
        ));
        return Err(ApiError(error.into_interface(correlation_id)));
    }
    Ok((UserId(user_id.trim().to_string()), SessionId(session_id.trim().to_string())))
}

fn reject(error: impl Into<ApplicationError>, operation: &str, correlation_id: &str) -> ApiError {
    let error: ApplicationError = error.into();
    warn!(
        event_name = "api.request_failed",
        correlation_id,
        operation,
        error = %error,
        "request failed"
    );
    ApiError(error.into_interface(correlation_id))
}

fn abandoned(operation: &str, correlation_id: &str) -> ApiError {
    reject(
        ApplicationError::Execution(format!("{operation} task ended without a result")),
        operation,
        correlation_id,
    )
}

pub async fn query(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let correlation_id = new_correlation_id();
    let (user_id, session_id) =
        identify(&request.user_id, &request.chat_session_id, &correlation_id)?;

    let runtime = state.runtime.clone();
    let task_correlation_id = correlation_id.clone();
    let outcome = state
        .tasks
        .run(async move {
            runtime
                .handle_message(&request.user_query, &user_id, &session_id, &task_correlation_id)
                .await
        })
        .await
        .map_err(|_| abandoned("query", &correlation_id))?
        .map_err(|error| reject(error, "query", &correlation_id))?;

    let kind = outcome.kind();
    Ok(Json(QueryResponse { result: outcome.into_response(), outcome: kind, correlation_id }))
}

pub async fn query_async(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let correlation_id = new_correlation_id();
    let (user_id, session_id) =
        identify(&request.user_id, &request.chat_session_id, &correlation_id)?;

    let runtime = state.runtime.clone();
    let task_correlation_id = correlation_id.clone();
    state.tasks.spawn(async move {
        let correlation_id = task_correlation_id;
        match runtime
            .handle_message(&request.user_query, &user_id, &session_id, &correlation_id)
            .await
        {
            Ok(outcome) => info!(
                event_name = "api.query_async.completed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                outcome = outcome.kind(),
                "background query finished"
            ),
            Err(error) => error!(
                event_name = "api.query_async.failed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                error = %error,
                "background query failed"
            ),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse { status: "query task started", correlation_id }),
    ))
}

pub async fn deploy(
    State(state): State<ApiState>,
    Json(request): Json<DeployRequest>,
) -> Result<Json<DeployResponse>, ApiError> {
    let correlation_id = new_correlation_id();
    let (user_id, session_id) =
        identify(&request.user_id, &request.chat_session_id, &correlation_id)?;

    let runtime = state.runtime.clone();
    let task_correlation_id = correlation_id.clone();
    let report = state
        .tasks
        .run(async move {
            runtime.trigger_deployment(&user_id, &session_id, &task_correlation_id).await
        })
        .await
        .map_err(|_| abandoned("deploy", &correlation_id))?
        .map_err(|error| reject(error, "deploy", &correlation_id))?;

    Ok(Json(DeployResponse {
        result: report.summary,
        commands: report.commands.into_iter().map(|record| record.command).collect(),
        correlation_id,
    }))
}

pub async fn deploy_async(
    State(state): State<ApiState>,
    Json(request): Json<DeployRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let correlation_id = new_correlation_id();
    let (user_id, session_id) =
        identify(&request.user_id, &request.chat_session_id, &correlation_id)?;

    let runtime = state.runtime.clone();
    let task_correlation_id = correlation_id.clone();
    state.tasks.spawn(async move {
        let correlation_id = task_correlation_id;
        match runtime.trigger_deployment(&user_id, &session_id, &correlation_id).await {
            Ok(report) => info!(
                event_name = "api.deploy_async.completed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                command_count = report.commands.len(),
                "background deployment finished"
            ),
            Err(error) => error!(
                event_name = "api.deploy_async.failed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                error = %error,
                "background deployment failed"
            ),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse { status: "deploy task started", correlation_id }),
    ))
}
