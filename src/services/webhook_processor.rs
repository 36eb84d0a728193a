use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::database::payee_account_repository::AccountSnapshot;
use crate::database::payment_session_repository::{PaymentSession, SessionStatus};
use crate::database::repository::{PayeeAccountStore, WebhookEventStore};
use crate::database::webhook_repository::WebhookEventRecord;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::payments::types::{ProcessorCheckoutSession, META_IDEMPOTENCY_TOKEN};
use crate::payments::webhook::{
    parse_event, ChargeObject, EventKind, PaymentIntentObject, WebhookError, WebhookEvent,
    WebhookVerifier,
};
use crate::services::checkout_session::{processor_split, CheckoutSessionService, TransitionOutcome};

const DEAUTHORIZED_REASON: &str = "application_deauthorized";
const MALFORMED_EVENT_TYPE: &str = "unparseable";

/// Acknowledgement returned to the processor
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip)]
    pub event_id: String,
    #[serde(skip)]
    pub duplicate: bool,
}

pub struct WebhookProcessor {
    events: Arc<dyn WebhookEventStore>,
    checkout: Arc<CheckoutSessionService>,
    accounts: Arc<dyn PayeeAccountStore>,
    verifier: WebhookVerifier,
}

impl WebhookProcessor {
    pub fn new(
        events: Arc<dyn WebhookEventStore>,
        checkout: Arc<CheckoutSessionService>,
        accounts: Arc<dyn PayeeAccountStore>,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            events,
            checkout,
            accounts,
            verifier,
        }
    }

    /// Authenticate, deduplicate and apply one delivery.
    ///
    /// Signature problems surface as validation errors (400). An authentic
    /// body that cannot be parsed is recorded as a failed ledger entry and
    /// acknowledged, since redelivering it cannot help. A failure while
    /// applying is recorded against the ledger entry and returned, so the
    /// processor redelivers.
    pub async fn process_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> AppResult<WebhookAck> {
        let event = match self.verifier.verify(raw_body, signature) {
            Ok(event) => event,
            Err(WebhookError::MalformedPayload { reason }) => {
                return self.record_malformed(raw_body, &reason).await;
            }
            Err(e) => {
                warn!(error = %e, "rejected webhook delivery");
                return Err(AppError::from(e));
            }
        };

        let payload = serde_json::from_slice(raw_body).unwrap_or(JsonValue::Null);
        let record = self
            .events
            .log_event(&event.id, &event.type_name, payload)
            .await?;

        if record.is_processed() {
            info!(event_id = %event.id, "webhook already processed");
            return Ok(WebhookAck {
                received: true,
                event_id: event.id,
                duplicate: true,
            });
        }

        self.apply_recorded(&record, &event).await?;
        Ok(WebhookAck {
            received: true,
            event_id: event.id,
            duplicate: false,
        })
    }

    async fn record_malformed(&self, raw_body: &[u8], reason: &str) -> AppResult<WebhookAck> {
        let parsed: Option<JsonValue> = serde_json::from_slice(raw_body).ok();
        let event_id = parsed
            .as_ref()
            .and_then(|v| v.get("id"))
            .and_then(JsonValue::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("malformed_{}", hex::encode(Sha256::digest(raw_body))));
        let event_type = parsed
            .as_ref()
            .and_then(|v| v.get("type"))
            .and_then(JsonValue::as_str)
            .unwrap_or(MALFORMED_EVENT_TYPE)
            .to_string();
        let payload = parsed.unwrap_or_else(|| {
            json!({ "raw": String::from_utf8_lossy(raw_body) })
        });

        let record = self.events.log_event(&event_id, &event_type, payload).await?;
        if !record.is_processed() {
            self.events.record_failure(record.id, reason).await?;
        }
        error!(
            event_id = %event_id,
            event_type = %event_type,
            reason = %reason,
            "authentic webhook payload could not be parsed; recorded and acknowledged"
        );
        Ok(WebhookAck {
            received: true,
            event_id,
            duplicate: false,
        })
    }

    async fn apply_recorded(&self, record: &WebhookEventRecord, event: &WebhookEvent) -> AppResult<()> {
        match self.process_event(event).await {
            Ok(()) => {
                self.events.mark_processed(record.id).await?;
                info!(event_id = %event.id, event_type = %event.type_name, "webhook processed");
                Ok(())
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "webhook processing failed");
                self.events.record_failure(record.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn process_event(&self, event: &WebhookEvent) -> AppResult<()> {
        match &event.kind {
            EventKind::SessionCompleted(remote) => self.on_session_completed(event, remote).await,
            EventKind::SessionExpired(remote) => {
                let Some(session) = self.find_for_processor_session(remote).await? else {
                    info!(event_id = %event.id, processor_session_id = %remote.id, "expired session unknown locally; ignoring");
                    return Ok(());
                };
                self.transition(event, &session, SessionStatus::Failed).await
            }
            EventKind::PaymentSucceeded(intent) => {
                self.on_payment_intent(event, intent, SessionStatus::Paid).await
            }
            EventKind::PaymentFailed(intent) => {
                self.on_payment_intent(event, intent, SessionStatus::Failed).await
            }
            EventKind::ChargeRefunded(charge) => self.on_charge_refunded(event, charge).await,
            EventKind::AccountUpdated(account) => {
                let snapshot = AccountSnapshot::from_processor(account, event_time(event));
                match self.accounts.apply_snapshot(&snapshot).await? {
                    Some(updated) => info!(
                        payee_id = %updated.payee_id,
                        status = %updated.status,
                        "payee account status updated from webhook"
                    ),
                    None => debug!(
                        sub_account_id = %account.id,
                        "account update ignored (unknown, restricted or stale)"
                    ),
                }
                Ok(())
            }
            EventKind::AccountDeauthorized { account_id } => {
                match self.accounts.mark_restricted(account_id, DEAUTHORIZED_REASON).await? {
                    Some(account) => warn!(
                        payee_id = %account.payee_id,
                        sub_account_id = %account_id,
                        "payee account deauthorized; marked RESTRICTED"
                    ),
                    None => debug!(sub_account_id = %account_id, "deauthorized account unknown locally"),
                }
                Ok(())
            }
            EventKind::Unsupported => {
                debug!(event_id = %event.id, event_type = %event.type_name, "unsupported event acknowledged");
                Ok(())
            }
        }
    }

    async fn on_session_completed(
        &self,
        event: &WebhookEvent,
        remote: &ProcessorCheckoutSession,
    ) -> AppResult<()> {
        let session = match self.checkout.materialize(remote).await {
            Ok(session) => session,
            Err(e) if is_not_found(&e) => {
                warn!(event_id = %event.id, processor_session_id = %remote.id, "completed session could not be resolved; ignoring");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if session.split().is_none() && session.payee_id.is_some() {
            let split = processor_split(session.gross_amount, remote.application_fee_amount)?;
            self.checkout.sessions().attach_split(session.id, split).await?;
        }

        if remote.payment_status.as_deref() == Some("unpaid") {
            // Delayed payment method; settles via async_payment_* events
            debug!(session_id = %session.id, "checkout completed but payment still pending");
            return Ok(());
        }
        self.transition(event, &session, SessionStatus::Paid).await
    }

    async fn on_payment_intent(
        &self,
        event: &WebhookEvent,
        intent: &PaymentIntentObject,
        to: SessionStatus,
    ) -> AppResult<()> {
        let sessions = self.checkout.sessions();
        let mut session = sessions.find_by_payment_intent(&intent.id).await?;

        if session.is_none() {
            if let Some(token) = intent.metadata.get(META_IDEMPOTENCY_TOKEN) {
                if let Some(found) = sessions.find_by_token(token).await? {
                    sessions.backfill_payment_intent(found.id, &intent.id).await?;
                    session = Some(found);
                }
            }
        }

        let Some(session) = session else {
            info!(event_id = %event.id, payment_intent = %intent.id, "payment intent unknown locally; ignoring");
            return Ok(());
        };
        self.transition(event, &session, to).await
    }

    async fn on_charge_refunded(&self, event: &WebhookEvent, charge: &ChargeObject) -> AppResult<()> {
        if !charge.refunded {
            info!(
                event_id = %event.id,
                charge_id = %charge.id,
                amount_refunded = ?charge.amount_refunded,
                "partial refund recorded by processor; session status unchanged"
            );
            return Ok(());
        }

        let Some(payment_intent) = &charge.payment_intent else {
            warn!(event_id = %event.id, charge_id = %charge.id, "refunded charge without payment intent");
            return Ok(());
        };
        let Some(session) = self
            .checkout
            .sessions()
            .find_by_payment_intent(payment_intent)
            .await?
        else {
            info!(event_id = %event.id, payment_intent = %payment_intent, "refunded payment unknown locally; ignoring");
            return Ok(());
        };
        self.transition(event, &session, SessionStatus::Refunded).await
    }

    async fn find_for_processor_session(
        &self,
        remote: &ProcessorCheckoutSession,
    ) -> AppResult<Option<PaymentSession>> {
        let sessions = self.checkout.sessions();
        if let Some(session) = sessions.find_by_processor_session_id(&remote.id).await? {
            return Ok(Some(session));
        }
        let Some(token) = remote.idempotency_token() else {
            return Ok(None);
        };
        let found = sessions.find_by_token(token).await?;
        if let Some(session) = &found {
            sessions
                .backfill_processor_session_id(session.id, &remote.id)
                .await?;
        }
        Ok(found)
    }

    async fn transition(
        &self,
        event: &WebhookEvent,
        session: &PaymentSession,
        to: SessionStatus,
    ) -> AppResult<()> {
        match self.checkout.apply_transition(session, to).await? {
            TransitionOutcome::Applied(_) | TransitionOutcome::AlreadyApplied(_) => Ok(()),
            TransitionOutcome::Rejected { session, requested } => {
                // Ordering anomaly: acknowledged, never applied
                warn!(
                    event_id = %event.id,
                    event_type = %event.type_name,
                    session_id = %session.id,
                    current = %session.status,
                    requested = %requested,
                    "webhook would regress payment status; ignored"
                );
                Ok(())
            }
        }
    }

    /// Re-apply ledger entries whose processing failed. Called by the retry worker.
    pub async fn retry_pending(&self, limit: i64, max_retries: i32) -> AppResult<usize> {
        let pending = self.events.get_pending_events(limit, max_retries).await?;

        let mut processed = 0;
        for record in pending {
            let event = match serde_json::to_vec(&record.payload)
                .map_err(|e| e.to_string())
                .and_then(|raw| parse_event(&raw).map_err(|e| e.to_string()))
            {
                Ok(event) => event,
                Err(reason) => {
                    warn!(id = %record.id, event_id = %record.event_id, reason = %reason, "stored webhook payload unreadable");
                    self.events.record_failure(record.id, &reason).await?;
                    continue;
                }
            };

            if self.apply_recorded(&record, &event).await.is_ok() {
                processed += 1;
            }
        }

        Ok(processed)
    }
}

fn event_time(event: &WebhookEvent) -> DateTime<Utc> {
    if event.created > 0 {
        if let Some(at) = Utc.timestamp_opt(event.created, 0).single() {
            return at;
        }
    }
    Utc::now()
}

fn is_not_found(err: &AppError) -> bool {
    matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::SessionNotFound { .. })
    )
}
