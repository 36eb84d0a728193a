//! HTTP surface

pub mod accounts;
pub mod sessions;
pub mod webhooks;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use crate::error::{AppError, ValidationError};
use crate::health::{HealthState, HealthStatus};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::SettlementServices;

/// Full application router with request-id and logging layers
pub fn router(services: SettlementServices) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .route(
            "/sessions",
            post(sessions::create_session).get(sessions::get_session_by_order),
        )
        .route("/sessions/{identifier}", get(sessions::get_session))
        .route("/webhook", post(webhooks::handle_webhook))
        .route("/accounts/{payee_id}/onboard", post(accounts::onboard))
        .route("/accounts/{payee_id}/status", get(accounts::status))
        .route("/accounts/{payee_id}/refresh-link", post(accounts::refresh_link))
        .route("/accounts/{payee_id}/dashboard-link", post(accounts::dashboard_link))
        .route("/accounts/{payee_id}/earnings", get(accounts::earnings))
        .route("/accounts/{payee_id}/fee-policy", put(accounts::set_fee_policy))
        .with_state(services)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// Attach the request id so it shows up in the error body
pub(crate) fn tag(request_id: &Option<String>) -> impl Fn(AppError) -> AppError + '_ {
    move |err| match request_id {
        Some(id) => err.with_request_id(id.clone()),
        None => err,
    }
}

/// Body parse failures are validation errors, not 422 plain text
pub(crate) fn body_error(rejection: JsonRejection) -> AppError {
    AppError::validation(ValidationError::InvalidField {
        field: "body".to_string(),
        reason: rejection.body_text(),
    })
}

async fn root() -> &'static str {
    "Settlement backend"
}

async fn health(
    State(services): State<SettlementServices>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = services.health.check_health().await;

    if health_status.status == HealthState::Unhealthy {
        error!("❌ Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - same checks as /health
async fn readiness(
    state: State<SettlementServices>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let result = health(state).await;
    if result.is_ok() {
        info!("✅ Readiness check passed");
    }
    result
}

/// Liveness probe - the process is up
async fn liveness() -> &'static str {
    "OK"
}
