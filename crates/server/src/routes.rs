use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use steward_agent::{TurnOutcome, TurnRouter};
use steward_core::quota::{QuotaError, QuotaLedger};
use steward_core::{AuthContext, ExecutionContext, OrchestrationError, Role};
use steward_db::DbPool;
use tracing::error;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<TurnRouter>,
    pub ledger: Arc<QuotaLedger>,
    pub pool: DbPool,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/orgs/{org_id}/quota", get(org_quota))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub org_id: String,
    pub user_id: String,
    pub role: String,
    pub session_id: String,
    pub message: String,
}

/// User-safe error body. The correlation id ties the response to the
/// server-side log line carrying the real cause.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    correlation_id: String,
}

enum ApiError {
    BadRequest(String),
    Orchestration(OrchestrationError),
}

impl From<OrchestrationError> for ApiError {
    fn from(error: OrchestrationError) -> Self {
        Self::Orchestration(error)
    }
}

impl From<QuotaError> for ApiError {
    fn from(error: QuotaError) -> Self {
        Self::Orchestration(error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let correlation_id = Uuid::new_v4().to_string();
        let (status, message) = match &self {
            Self::BadRequest(message) => (StatusCode::UNPROCESSABLE_ENTITY, message.clone()),
            Self::Orchestration(error) => {
                let status = match error {
                    OrchestrationError::Quota(QuotaError::Exceeded { .. }) => {
                        StatusCode::TOO_MANY_REQUESTS
                    }
                    OrchestrationError::Quota(QuotaError::Store(_))
                    | OrchestrationError::Persistence(_)
                    | OrchestrationError::LlmUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    OrchestrationError::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
                    OrchestrationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if !error.is_quota_refusal() {
                    error!(
                        event_name = "http.request_failed",
                        correlation_id = %correlation_id,
                        error = %error,
                        "request failed"
                    );
                }
                (status, error.user_message())
            }
        };
        (status, Json(ErrorBody { error: message, correlation_id })).into_response()
    }
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_owned()));
    }
    if request.org_id.trim().is_empty() || request.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("org_id and user_id must not be empty".to_owned()));
    }

    let mut ctx = ExecutionContext::new(
        AuthContext {
            org_id: request.org_id,
            user_id: request.user_id,
            role: Role::parse(&request.role),
        },
        request.session_id,
        Uuid::new_v4().to_string(),
    );
    let outcome = state.router.handle_turn(&mut ctx, &request.message).await?;
    Ok(Json(outcome))
}

async fn org_quota(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<Response, ApiError> {
    let quota = state.ledger.quota(&org_id).await?;
    Ok(Json(quota).into_response())
}

async fn healthz(State(state): State<AppState>) -> Response {
    match steward_db::ping(&state.pool).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(error) => {
            error!(event_name = "http.health_check_failed", error = %error, "db ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "degraded" })))
                .into_response()
        }
    }
}
