use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::middleware::error::get_request_id_from_headers;
use crate::payments::webhook::SIGNATURE_HEADER;
use crate::SettlementServices;

/// POST /webhook
///
/// Takes the body as raw bytes: the signature covers the exact bytes sent.
pub async fn handle_webhook(
    State(services): State<SettlementServices>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match services.webhooks.process_webhook(&body, signature).await {
        Ok(ack) => {
            info!(event_id = %ack.event_id, duplicate = ack.duplicate, "webhook acknowledged");
            (StatusCode::OK, Json(ack)).into_response()
        }
        Err(e) => match get_request_id_from_headers(&headers) {
            Some(request_id) => e.with_request_id(request_id).into_response(),
            None => e.into_response(),
        },
    }
}
