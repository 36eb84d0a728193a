//! Checkout session endpoints
//!
//! `GET /sessions/{identifier}` is deliberately unauthenticated: the customer
//! lands on it straight from the processor's redirect with no session context.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::{body_error, tag};
use crate::database::payment_session_repository::PaymentSession;
use crate::error::{AppError, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::services::checkout_session::{CreateSessionRequest, CreateSessionResponse};
use crate::SettlementServices;

#[derive(Debug, Default, Deserialize)]
pub struct SessionLookupQuery {
    #[serde(default, alias = "orderId")]
    pub order_id: Option<String>,
}

/// POST /sessions
pub async fn create_session(
    State(services): State<SettlementServices>,
    headers: HeaderMap,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = body.map_err(body_error).map_err(tag(&request_id))?;

    info!(
        order_id = ?request.order_id,
        payee_id = ?request.payee_id,
        items = request.line_items.len(),
        "checkout session requested"
    );

    let response = services
        .checkout
        .create_session(request)
        .await
        .map_err(tag(&request_id))?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /sessions/{identifier}?order_id=
pub async fn get_session(
    State(services): State<SettlementServices>,
    headers: HeaderMap,
    Path(identifier): Path<String>,
    Query(query): Query<SessionLookupQuery>,
) -> Result<Json<PaymentSession>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let session = services
        .checkout
        .resolve_status(Some(&identifier), query.order_id.as_deref())
        .await
        .map_err(tag(&request_id))?;
    Ok(Json(session))
}

/// GET /sessions?order_id=
pub async fn get_session_by_order(
    State(services): State<SettlementServices>,
    headers: HeaderMap,
    Query(query): Query<SessionLookupQuery>,
) -> Result<Json<PaymentSession>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let Some(order_id) = query.order_id.as_deref().filter(|s| !s.trim().is_empty()) else {
        return Err(tag(&request_id)(AppError::validation(
            ValidationError::MissingField {
                field: "order_id".to_string(),
            },
        )));
    };

    let session = services
        .checkout
        .resolve_status(None, Some(order_id))
        .await
        .map_err(tag(&request_id))?;
    Ok(Json(session))
}
