//! Webhook authentication and parsing
//!
//! The processor signs `"{timestamp}.{raw body}"` with HMAC-SHA256 and sends
//! `t=<unix secs>,v1=<hex>[,v1=<hex>...]` in the signature header. Verification
//! runs on the exact bytes received; the body is only deserialized after the
//! signature checks out, and only into the closed [`EventKind`] set.

use crate::error::{AppError, ValidationError};
use crate::payments::types::ProcessorAccount;
use crate::payments::types::ProcessorCheckoutSession;
use crate::payments::utils::{hmac_sha256_hex, secure_eq};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

pub const SIGNATURE_HEADER: &str = "x-processor-signature";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("signature header missing")]
    SignatureMissing,

    #[error("signature invalid: {reason}")]
    SignatureInvalid { reason: String },

    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::SignatureMissing => AppError::validation(ValidationError::SignatureMissing),
            WebhookError::SignatureInvalid { reason } => {
                AppError::validation(ValidationError::SignatureInvalid { reason })
            }
            WebhookError::MalformedPayload { reason } => {
                AppError::validation(ValidationError::InvalidField {
                    field: "body".to_string(),
                    reason,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub last_payment_error: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChargeObject {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub amount_refunded: Option<i64>,
    /// True only once the charge is fully refunded
    #[serde(default)]
    pub refunded: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Closed set of events the engine acts on
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    SessionCompleted(ProcessorCheckoutSession),
    SessionExpired(ProcessorCheckoutSession),
    PaymentSucceeded(PaymentIntentObject),
    PaymentFailed(PaymentIntentObject),
    ChargeRefunded(ChargeObject),
    AccountUpdated(ProcessorAccount),
    AccountDeauthorized { account_id: String },
    /// Acknowledged and ignored
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: String,
    pub type_name: String,
    /// Processor-side creation time, unix seconds
    pub created: i64,
    pub kind: EventKind,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    account: Option<String>,
    #[serde(default)]
    data: EnvelopeData,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    object: JsonValue,
}

/// Parsed `t=...,v1=...` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

pub fn parse_signature_header(header: &str) -> Result<SignatureHeader, WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| WebhookError::SignatureInvalid {
                    reason: "timestamp is not an integer".to_string(),
                })?)
            }
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| WebhookError::SignatureInvalid {
        reason: "timestamp element missing".to_string(),
    })?;
    if signatures.is_empty() {
        return Err(WebhookError::SignatureInvalid {
            reason: "no v1 signature present".to_string(),
        });
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Build a signature header value for `payload`. Used by test harnesses and
/// local tooling that replay events.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let signed = signed_payload(timestamp, payload);
    let digest = hmac_sha256_hex(secret.as_bytes(), &signed).unwrap_or_default();
    format!("t={},v1={}", timestamp, digest)
}

fn signed_payload(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    signed
}

/// Verify `raw_body` against `signature_header` and parse the event.
pub fn verify(
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<WebhookEvent, WebhookError> {
    let header = signature_header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(WebhookError::SignatureMissing)?;
    let header = parse_signature_header(header)?;

    let age = now - header.timestamp;
    if age.abs() > tolerance_secs {
        return Err(WebhookError::SignatureInvalid {
            reason: format!("timestamp outside tolerance ({}s)", age),
        });
    }

    let expected = hmac_sha256_hex(secret.as_bytes(), &signed_payload(header.timestamp, raw_body))
        .ok_or_else(|| WebhookError::SignatureInvalid {
            reason: "unusable signing secret".to_string(),
        })?;

    let matched = header
        .signatures
        .iter()
        .any(|candidate| secure_eq(expected.as_bytes(), candidate.as_bytes()));
    if !matched {
        return Err(WebhookError::SignatureInvalid {
            reason: "no signature matched the payload".to_string(),
        });
    }

    parse_event(raw_body)
}

/// Verifier bound to the configured secret and bypass flag
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
    bypass: bool,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
            bypass: false,
        }
    }

    /// Skip signature checks. Never enable outside local development.
    pub fn with_bypass(mut self, bypass: bool) -> Self {
        if bypass {
            error!("webhook signature bypass ENABLED; unsigned events will be accepted");
        }
        self.bypass = bypass;
        self
    }

    pub fn verify(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookEvent, WebhookError> {
        if self.bypass {
            warn!(
                signature_present = signature_header.is_some(),
                "webhook signature bypass engaged; accepting event without verification"
            );
            return parse_event(raw_body);
        }
        verify(
            raw_body,
            signature_header,
            &self.secret,
            self.tolerance_secs,
            chrono::Utc::now().timestamp(),
        )
    }
}

/// Parse an already-authenticated body into a typed event
pub fn parse_event(raw_body: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let envelope: Envelope =
        serde_json::from_slice(raw_body).map_err(|e| WebhookError::MalformedPayload {
            reason: format!("invalid event JSON: {}", e),
        })?;

    let object = envelope.data.object;
    let kind = match envelope.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded"
        | "session.completed" => EventKind::SessionCompleted(decode(object, "checkout session")?),
        "checkout.session.expired" | "checkout.session.async_payment_failed" => {
            EventKind::SessionExpired(decode(object, "checkout session")?)
        }
        "payment_intent.succeeded" | "payment.succeeded" => {
            EventKind::PaymentSucceeded(decode(object, "payment intent")?)
        }
        "payment_intent.payment_failed" | "payment.failed" => {
            EventKind::PaymentFailed(decode(object, "payment intent")?)
        }
        "charge.refunded" => EventKind::ChargeRefunded(decode(object, "charge")?),
        "account.updated" => EventKind::AccountUpdated(decode(object, "account")?),
        "account.application.deauthorized" => {
            let account_id = envelope.account.clone().ok_or_else(|| {
                WebhookError::MalformedPayload {
                    reason: "deauthorization event without account".to_string(),
                }
            })?;
            EventKind::AccountDeauthorized { account_id }
        }
        _ => EventKind::Unsupported,
    };

    Ok(WebhookEvent {
        id: envelope.id,
        type_name: envelope.event_type,
        created: envelope.created,
        kind,
    })
}

fn decode<T: serde::de::DeserializeOwned>(object: JsonValue, what: &str) -> Result<T, WebhookError> {
    serde_json::from_value(object).map_err(|e| WebhookError::MalformedPayload {
        reason: format!("invalid {}: {}", what, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_unit";
    const NOW: i64 = 1_760_000_000;

    fn completed_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": NOW,
            "data": { "object": {
                "id": "cs_test_abc",
                "status": "complete",
                "payment_status": "paid",
                "amount_total": 11100,
                "metadata": { "idempotency_token": "pst_1_x" }
            }}
        }))
        .unwrap()
    }

    #[test]
    fn valid_signature_yields_typed_event() {
        let body = completed_body();
        let header = sign_payload(&body, SECRET, NOW);
        let event = verify(&body, Some(&header), SECRET, 300, NOW + 10).unwrap();

        assert_eq!(event.id, "evt_1");
        match event.kind {
            EventKind::SessionCompleted(session) => {
                assert_eq!(session.id, "cs_test_abc");
                assert_eq!(session.idempotency_token(), Some("pst_1_x"));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn any_byte_change_invalidates_signature() {
        let body = completed_body();
        let header = sign_payload(&body, SECRET, NOW);

        // re-serialized JSON is semantically equal but not byte-equal
        let reencoded = serde_json::to_vec_pretty(
            &serde_json::from_slice::<JsonValue>(&body).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            verify(&reencoded, Some(&header), SECRET, 300, NOW),
            Err(WebhookError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn missing_header_is_reported_distinctly() {
        let body = completed_body();
        assert_eq!(
            verify(&body, None, SECRET, 300, NOW),
            Err(WebhookError::SignatureMissing)
        );
        assert_eq!(
            verify(&body, Some("  "), SECRET, 300, NOW),
            Err(WebhookError::SignatureMissing)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let body = completed_body();
        let header = sign_payload(&body, SECRET, NOW);
        assert!(verify(&body, Some(&header), SECRET, 300, NOW + 301).is_err());
        assert!(verify(&body, Some(&header), SECRET, 300, NOW - 301).is_err());
    }

    #[test]
    fn rotated_secrets_match_any_v1() {
        let body = completed_body();
        let good = sign_payload(&body, SECRET, NOW);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v1={}", NOW, good_sig);
        assert!(verify(&body, Some(&header), SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn short_aliases_and_unknown_kinds() {
        let body = json!({
            "id": "evt_2",
            "type": "payment.failed",
            "created": NOW,
            "data": { "object": { "id": "pi_1" } }
        });
        let event = parse_event(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert!(matches!(event.kind, EventKind::PaymentFailed(ref pi) if pi.id == "pi_1"));

        let unknown = json!({ "id": "evt_3", "type": "customer.created", "data": { "object": {} } });
        let event = parse_event(&serde_json::to_vec(&unknown).unwrap()).unwrap();
        assert_eq!(event.kind, EventKind::Unsupported);
    }

    #[test]
    fn deauthorization_reads_envelope_account() {
        let body = json!({
            "id": "evt_4",
            "type": "account.application.deauthorized",
            "account": "acct_9",
            "data": { "object": { "id": "ca_1" } }
        });
        let event = parse_event(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(
            event.kind,
            EventKind::AccountDeauthorized {
                account_id: "acct_9".to_string()
            }
        );
    }

    #[test]
    fn bypass_accepts_unsigned_body() {
        let verifier = WebhookVerifier::new(SECRET, 300).with_bypass(true);
        assert!(verifier.verify(&completed_body(), None).is_ok());

        let strict = WebhookVerifier::new(SECRET, 300);
        assert_eq!(
            strict.verify(&completed_body(), None),
            Err(WebhookError::SignatureMissing)
        );
    }
}
