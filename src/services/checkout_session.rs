//! Checkout session lifecycle
//!
//! Sessions are persisted PENDING under a locally generated idempotency token
//! before the processor is called, so a caller redirected back from the
//! processor can always find its session, even if the processor id was never
//! written. Lookups that succeed through a fallback path backfill the missing
//! cross-reference.
//!
//! All status changes go through [`CheckoutSessionService::apply_transition`],
//! which enforces the forward-only table with a conditional store write, and
//! pushes each settled status to the order subsystem at most once.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SettlementConfig;
use crate::database::payee_account_repository::AccountStatus;
use crate::database::payment_session_repository::{
    NewPaymentSession, PaymentSession, SessionStatus, TransitionCheck,
};
use crate::database::repository::{PayeeAccountStore, PaymentSessionStore};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ExternalError, ValidationError};
use crate::payments::error::PaymentError;
use crate::payments::provider::PaymentProcessor;
use crate::payments::types::{
    CheckoutOutcome, CheckoutSessionRequest, LineItem, ProcessorCheckoutSession,
    META_IDEMPOTENCY_TOKEN, META_ORDER_ID, META_PAYEE_ID,
};
use crate::services::fee_calculation::{FeePolicy, FeeSplit};
use crate::services::notification::NotificationService;
use crate::services::orders::OrderGateway;

const TOKEN_PREFIX: &str = "pst";

fn processor_session_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^cs_[A-Za-z0-9_]+$").ok())
        .as_ref()
}

/// True for identifiers shaped like a processor checkout session id
pub fn is_processor_session_id(identifier: &str) -> bool {
    processor_session_pattern().is_some_and(|pattern| pattern.is_match(identifier))
}

/// `pst_{unix millis}_{uuid}`
pub fn generate_token(now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        TOKEN_PREFIX,
        now.timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Creation time embedded in a token, if the token is one of ours
pub fn token_timestamp(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.splitn(3, '_');
    if parts.next()? != TOKEN_PREFIX {
        return None;
    }
    let millis: i64 = parts.next()?.parse().ok()?;
    parts.next()?;
    Utc.timestamp_millis_opt(millis).single()
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub default_fee_percent: Decimal,
    pub currency: String,
    pub max_amount_minor: i64,
    pub success_url: String,
    pub cancel_url: String,
    pub proximity_fallback_enabled: bool,
    pub proximity_window_secs: i64,
    /// Upper bound on a direct processor lookup during resolution
    pub processor_timeout: Duration,
}

impl CheckoutSettings {
    pub fn from_config(config: &SettlementConfig, processor_timeout: Duration) -> Self {
        Self {
            default_fee_percent: config.default_fee_percent,
            currency: config.currency.clone(),
            max_amount_minor: config.max_session_amount_minor,
            success_url: config.checkout_success_url.clone(),
            cancel_url: config.checkout_cancel_url.clone(),
            proximity_fallback_enabled: config.proximity_fallback_enabled,
            proximity_window_secs: config.proximity_window_secs,
            processor_timeout,
        }
    }
}

/// Line item as received. Amounts stay untyped until validated so a bad item
/// is reported by index and name rather than as a body parse failure.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemInput {
    #[serde(default)]
    pub name: String,
    #[serde(alias = "unit_amount", alias = "unitPrice", alias = "price")]
    pub unit_amount: JsonValue,
    #[serde(default = "default_quantity")]
    pub quantity: JsonValue,
}

fn default_quantity() -> JsonValue {
    JsonValue::from(1)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default, alias = "order_id", alias = "orderRef")]
    pub order_id: Option<String>,
    #[serde(alias = "line_items")]
    pub line_items: Vec<LineItemInput>,
    #[serde(default, alias = "payee_id", alias = "businessId")]
    pub payee_id: Option<String>,
    #[serde(default, alias = "fee_override")]
    pub fee_override: Option<FeePolicy>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    /// Processor session id
    pub session_id: String,
    pub payment_id: Uuid,
    pub idempotency_token: String,
    pub redirect_url: Option<String>,
    pub gross_amount: i64,
    pub currency: String,
    pub platform_fee: Option<i64>,
    pub net_amount: Option<i64>,
}

/// Result of asking for a status change
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(PaymentSession),
    /// Already at the target status
    AlreadyApplied(PaymentSession),
    /// Forbidden by the transition table (out-of-order or regressing event)
    Rejected {
        session: PaymentSession,
        requested: SessionStatus,
    },
}

impl TransitionOutcome {
    pub fn session(&self) -> &PaymentSession {
        match self {
            TransitionOutcome::Applied(s) | TransitionOutcome::AlreadyApplied(s) => s,
            TransitionOutcome::Rejected { session, .. } => session,
        }
    }
}

/// Split as the processor collected it. A session carrying no application
/// fee paid the whole gross to the payee.
pub fn processor_split(gross: i64, application_fee: Option<i64>) -> AppResult<FeeSplit> {
    Ok(FeePolicy::Fixed(application_fee.unwrap_or(0)).apply(gross)?)
}

/// Validate items and return them with the gross total in minor units
pub fn validate_line_items(
    items: &[LineItemInput],
    max_amount_minor: i64,
) -> AppResult<(Vec<LineItem>, i64)> {
    if items.is_empty() {
        return Err(AppError::validation(ValidationError::MissingField {
            field: "lineItems".to_string(),
        }));
    }

    let mut validated = Vec::with_capacity(items.len());
    let mut gross: i64 = 0;

    for (index, item) in items.iter().enumerate() {
        let invalid = |reason: &str| {
            AppError::validation(ValidationError::InvalidLineItem {
                index,
                name: item.name.clone(),
                reason: reason.to_string(),
            })
        };

        if item.name.trim().is_empty() {
            return Err(invalid("name is required"));
        }
        let unit_amount = item
            .unit_amount
            .as_i64()
            .filter(|v| *v > 0)
            .ok_or_else(|| invalid("unit_amount must be a positive integer in minor units"))?;
        let quantity = item
            .quantity
            .as_i64()
            .filter(|v| *v >= 1)
            .ok_or_else(|| invalid("quantity must be an integer of at least 1"))?;

        let out_of_range = || {
            AppError::validation(ValidationError::AmountOutOfRange {
                amount: "overflow".to_string(),
                max: max_amount_minor,
            })
        };
        let line_total = unit_amount.checked_mul(quantity).ok_or_else(out_of_range)?;
        gross = gross.checked_add(line_total).ok_or_else(out_of_range)?;

        validated.push(LineItem {
            name: item.name.trim().to_string(),
            unit_amount,
            quantity,
        });
    }

    if gross <= 0 || gross > max_amount_minor {
        return Err(AppError::validation(ValidationError::AmountOutOfRange {
            amount: gross.to_string(),
            max: max_amount_minor,
        }));
    }

    Ok((validated, gross))
}

pub struct CheckoutSessionService {
    sessions: Arc<dyn PaymentSessionStore>,
    accounts: Arc<dyn PayeeAccountStore>,
    processor: Arc<dyn PaymentProcessor>,
    orders: Arc<dyn OrderGateway>,
    notifications: NotificationService,
    settings: CheckoutSettings,
}

impl CheckoutSessionService {
    pub fn new(
        sessions: Arc<dyn PaymentSessionStore>,
        accounts: Arc<dyn PayeeAccountStore>,
        processor: Arc<dyn PaymentProcessor>,
        orders: Arc<dyn OrderGateway>,
        notifications: NotificationService,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            sessions,
            accounts,
            processor,
            orders,
            notifications,
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<dyn PaymentSessionStore> {
        &self.sessions
    }

    pub async fn create_session(&self, request: CreateSessionRequest) -> AppResult<CreateSessionResponse> {
        let (line_items, gross) =
            validate_line_items(&request.line_items, self.settings.max_amount_minor)?;

        let order_id = request
            .order_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from);
        if let Some(order_id) = &order_id {
            let order = self.orders.get_order(order_id).await?;
            if order.is_paid() {
                return Err(AppError::domain(DomainError::OrderAlreadyPaid {
                    order_id: order_id.clone(),
                }));
            }
        }

        let mut split: Option<FeeSplit> = None;
        let mut destination: Option<String> = None;
        if let Some(payee_id) = &request.payee_id {
            // Fresh read: readiness gates money movement
            let account = self.accounts.get(payee_id).await?;
            let status = account
                .as_ref()
                .map(|a| a.status)
                .unwrap_or(AccountStatus::NotConnected);
            let sub_account_id = account.as_ref().and_then(|a| a.sub_account_id.clone());

            let (Some(account), Some(sub_account_id), AccountStatus::Active) =
                (account, sub_account_id, status)
            else {
                return Err(AppError::domain(DomainError::PayeeNotReady {
                    payee_id: payee_id.clone(),
                    status: status.to_string(),
                }));
            };

            let policy = request
                .fee_override
                .or(account.fee_policy)
                .unwrap_or(FeePolicy::Percentage(self.settings.default_fee_percent));
            split = Some(policy.apply(gross)?);
            destination = Some(sub_account_id);
        }

        let now = Utc::now();
        let token = generate_token(now);
        let session = self
            .sessions
            .insert(NewPaymentSession {
                id: Uuid::new_v4(),
                idempotency_token: Some(token.clone()),
                processor_session_id: None,
                payment_intent_id: None,
                order_id: order_id.clone(),
                gross_amount: gross,
                currency: self.settings.currency.clone(),
                status: SessionStatus::Pending,
                split,
                payee_id: request.payee_id.clone(),
                created_at: now,
            })
            .await?;

        let mut metadata = HashMap::new();
        metadata.insert(META_IDEMPOTENCY_TOKEN.to_string(), token.clone());
        metadata.insert("payment_id".to_string(), session.id.to_string());
        if let Some(order_id) = &order_id {
            metadata.insert(META_ORDER_ID.to_string(), order_id.clone());
        }
        if let Some(payee_id) = &request.payee_id {
            metadata.insert(META_PAYEE_ID.to_string(), payee_id.clone());
        }

        let processor_request = CheckoutSessionRequest {
            line_items,
            currency: self.settings.currency.clone(),
            success_url: self.settings.success_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            client_reference_id: token.clone(),
            metadata,
            application_fee_amount: split.map(|s| s.platform_fee),
            transfer_destination: destination,
            idempotency_key: token.clone(),
        };

        let remote = match self.processor.create_checkout_session(&processor_request).await {
            Ok(remote) => remote,
            Err(e) => {
                // Row stays PENDING; the reconciler or a retry settles it
                warn!(
                    session_id = %session.id,
                    token = %token,
                    error = %e,
                    "processor checkout creation failed"
                );
                return Err(AppError::new(AppErrorKind::External(ExternalError::Processor {
                    message: e.to_string(),
                    is_retryable: true,
                })));
            }
        };

        self.backfill_processor_refs(&session, &remote).await;

        info!(
            session_id = %session.id,
            processor_session_id = %remote.id,
            gross_amount = gross,
            payee_id = ?request.payee_id,
            "checkout session created"
        );

        Ok(CreateSessionResponse {
            session_id: remote.id,
            payment_id: session.id,
            idempotency_token: token,
            redirect_url: remote.url,
            gross_amount: gross,
            currency: session.currency,
            platform_fee: split.map(|s| s.platform_fee),
            net_amount: split.map(|s| s.net_amount),
        })
    }

    /// Record the processor's ids on a local row. Failures are logged only;
    /// resolution by token still reaches the row.
    async fn backfill_processor_refs(&self, session: &PaymentSession, remote: &ProcessorCheckoutSession) {
        if session.processor_session_id.is_none() {
            if let Err(e) = self
                .sessions
                .backfill_processor_session_id(session.id, &remote.id)
                .await
            {
                error!(
                    session_id = %session.id,
                    processor_session_id = %remote.id,
                    error = %e,
                    "failed to record processor session id"
                );
            }
        }
        if let (None, Some(payment_intent)) = (&session.payment_intent_id, &remote.payment_intent) {
            if let Err(e) = self
                .sessions
                .backfill_payment_intent(session.id, payment_intent)
                .await
            {
                warn!(session_id = %session.id, error = %e, "failed to record payment intent id");
            }
        }
    }

    /// Find a session by processor id, token, order hint, or (last resort)
    /// creation-time proximity, falling back to the processor itself.
    pub async fn resolve_status(
        &self,
        identifier: Option<&str>,
        order_hint: Option<&str>,
    ) -> AppResult<PaymentSession> {
        let identifier = identifier.map(str::trim).filter(|s| !s.is_empty());
        let order_hint = order_hint.map(str::trim).filter(|s| !s.is_empty());

        if let Some(id) = identifier {
            if let Some(session) = self.sessions.find_by_processor_session_id(id).await? {
                return Ok(session);
            }
            if let Some(session) = self.sessions.find_by_token(id).await? {
                return Ok(session);
            }
        }

        if let Some(order_id) = order_hint {
            if let Some(session) = self.sessions.find_latest_by_order(order_id).await? {
                if let Some(id) = identifier {
                    self.backfill_identifier(&session, id).await;
                }
                debug!(session_id = %session.id, order_id = %order_id, "resolved session by order hint");
                return self.reload(session).await;
            }
        }

        if let Some(id) = identifier {
            if let Some(session) = self.resolve_by_proximity(id).await? {
                return Ok(session);
            }
            if is_processor_session_id(id) {
                return self.materialize_from_processor(id).await;
            }
        }

        Err(AppError::domain(DomainError::SessionNotFound {
            identifier: identifier.or(order_hint).unwrap_or_default().to_string(),
        }))
    }

    async fn backfill_identifier(&self, session: &PaymentSession, identifier: &str) {
        let result = if is_processor_session_id(identifier) {
            if session.processor_session_id.is_some() {
                return;
            }
            self.sessions
                .backfill_processor_session_id(session.id, identifier)
                .await
        } else if token_timestamp(identifier).is_some() {
            if session.idempotency_token.is_some() {
                return;
            }
            self.sessions.backfill_token(session.id, identifier).await
        } else {
            return;
        };

        if let Err(e) = result {
            warn!(session_id = %session.id, identifier = %identifier, error = %e, "cross-reference backfill failed");
        }
    }

    async fn reload(&self, session: PaymentSession) -> AppResult<PaymentSession> {
        Ok(self.sessions.get(session.id).await?.unwrap_or(session))
    }

    /// Match a token to the only untokened session created near the time it
    /// encodes. Ambiguous matches are refused.
    async fn resolve_by_proximity(&self, token: &str) -> AppResult<Option<PaymentSession>> {
        if !self.settings.proximity_fallback_enabled {
            return Ok(None);
        }
        let Some(created_around) = token_timestamp(token) else {
            return Ok(None);
        };

        let mut candidates = self
            .sessions
            .find_untokened_near(created_around, self.settings.proximity_window_secs)
            .await?;

        match candidates.len() {
            0 => Ok(None),
            1 => {
                let session = candidates.remove(0);
                warn!(
                    session_id = %session.id,
                    token = %token,
                    "session resolved by creation-time proximity; backfilling token"
                );
                self.backfill_identifier(&session, token).await;
                self.reload(session).await.map(Some)
            }
            n => {
                warn!(token = %token, candidates = n, "proximity lookup ambiguous; refusing to guess");
                Ok(None)
            }
        }
    }

    /// Fetch a session the processor knows about but we do not, and record it
    pub async fn materialize_from_processor(
        &self,
        processor_session_id: &str,
    ) -> AppResult<PaymentSession> {
        let remote = match tokio::time::timeout(
            self.settings.processor_timeout,
            self.processor.retrieve_checkout_session(processor_session_id),
        )
        .await
        {
            Err(_) => {
                return Err(AppError::new(AppErrorKind::External(ExternalError::Timeout {
                    service: "Payment processor".to_string(),
                    timeout_secs: self.settings.processor_timeout.as_secs(),
                })))
            }
            Ok(Err(PaymentError::NotFound { .. })) => {
                return Err(AppError::domain(DomainError::SessionNotFound {
                    identifier: processor_session_id.to_string(),
                }))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(remote)) => remote,
        };

        self.materialize(&remote).await
    }

    /// Local row for a processor session, creating it when missing and
    /// bringing its status in line with the processor's view
    pub async fn materialize(&self, remote: &ProcessorCheckoutSession) -> AppResult<PaymentSession> {
        if let Some(existing) = self.sessions.find_by_processor_session_id(&remote.id).await? {
            return self.apply_remote_outcome(existing, remote).await;
        }

        // A row created by us whose processor id write was lost
        if let Some(token) = remote.idempotency_token() {
            if let Some(existing) = self.sessions.find_by_token(token).await? {
                self.backfill_processor_refs(&existing, remote).await;
                let existing = self.reload(existing).await?;
                return self.apply_remote_outcome(existing, remote).await;
            }
        }

        let gross = remote.amount_total.filter(|a| *a > 0).ok_or_else(|| {
            warn!(processor_session_id = %remote.id, "processor session has no usable amount");
            AppError::domain(DomainError::SessionNotFound {
                identifier: remote.id.clone(),
            })
        })?;

        let payee_id = match remote.payee_id() {
            Some(payee_id) if self.accounts.get(payee_id).await?.is_some() => Some(payee_id.to_string()),
            _ => None,
        };
        let split = match payee_id {
            Some(_) => Some(processor_split(gross, remote.application_fee_amount)?),
            None => None,
        };
        let created_at = remote
            .created
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        let session = self
            .sessions
            .insert_or_get_by_processor_id(NewPaymentSession {
                id: Uuid::new_v4(),
                idempotency_token: remote
                    .idempotency_token()
                    .filter(|t| token_timestamp(t).is_some())
                    .map(String::from),
                processor_session_id: Some(remote.id.clone()),
                payment_intent_id: remote.payment_intent.clone(),
                order_id: remote.order_id().map(String::from),
                gross_amount: gross,
                currency: remote
                    .currency
                    .clone()
                    .unwrap_or_else(|| self.settings.currency.clone()),
                status: SessionStatus::Pending,
                split,
                payee_id,
                created_at,
            })
            .await?;

        info!(
            session_id = %session.id,
            processor_session_id = %remote.id,
            "materialized session from processor view"
        );
        self.apply_remote_outcome(session, remote).await
    }

    async fn apply_remote_outcome(
        &self,
        session: PaymentSession,
        remote: &ProcessorCheckoutSession,
    ) -> AppResult<PaymentSession> {
        let target = match remote.outcome() {
            CheckoutOutcome::Paid => SessionStatus::Paid,
            CheckoutOutcome::Expired => SessionStatus::Failed,
            CheckoutOutcome::Open => return Ok(session),
        };
        let outcome = self.apply_transition(&session, target).await?;
        Ok(outcome.session().clone())
    }

    /// Move a session to `to` if the transition table allows it.
    ///
    /// Re-applying the current status is a silent success. A concurrent writer
    /// winning the conditional update is resolved by re-reading. Settled
    /// statuses are then pushed to the order subsystem exactly once.
    pub async fn apply_transition(
        &self,
        session: &PaymentSession,
        to: SessionStatus,
    ) -> AppResult<TransitionOutcome> {
        let mut current = session.clone();

        let outcome = loop {
            match current.status.check_transition(to) {
                TransitionCheck::NoOp => break TransitionOutcome::AlreadyApplied(current),
                TransitionCheck::Invalid => {
                    break TransitionOutcome::Rejected {
                        session: current,
                        requested: to,
                    }
                }
                TransitionCheck::Apply => {
                    if self.sessions.transition(current.id, current.status, to).await? {
                        let updated = self.reload(current).await?;
                        info!(
                            session_id = %updated.id,
                            status = %updated.status,
                            "payment session transitioned"
                        );
                        break TransitionOutcome::Applied(updated);
                    }
                    // Lost the race; the table decides against the fresh row
                    current = self.sessions.get(current.id).await?.ok_or_else(|| {
                        AppError::domain(DomainError::SessionNotFound {
                            identifier: session.id.to_string(),
                        })
                    })?;
                }
            }
        };

        match &outcome {
            TransitionOutcome::Applied(s) | TransitionOutcome::AlreadyApplied(s) => {
                self.sync_order(s).await?;
            }
            TransitionOutcome::Rejected { session, requested } => {
                warn!(
                    session_id = %session.id,
                    current = %session.status,
                    requested = %requested,
                    "rejected out-of-order payment status transition"
                );
            }
        }
        Ok(outcome)
    }

    /// Push a settled status to the order subsystem and announce it. Guarded
    /// by a per-session claim so concurrent callers produce one write. A failed
    /// push releases the claim, leaving the session for [`Self::resync_order`].
    ///
    /// Returns true when this caller performed the push.
    async fn sync_order(&self, session: &PaymentSession) -> AppResult<bool> {
        if session.status == SessionStatus::Pending
            || session.order_status_synced == Some(session.status)
        {
            return Ok(false);
        }
        if !self.sessions.claim_order_sync(session.id, session.status).await? {
            return Ok(false);
        }

        if let Some(order_id) = &session.order_id {
            if let Err(e) = self.orders.set_payment_status(order_id, session.status).await {
                error!(
                    session_id = %session.id,
                    order_id = %order_id,
                    error = %e,
                    "order payment status update failed; releasing claim"
                );
                self.sessions
                    .release_order_sync(session.id, session.status, session.order_status_synced)
                    .await?;
                return Err(AppError::from(e).with_context(format!("session {}", session.id)));
            }
        }

        self.notifications.payment_updated(session).await;
        Ok(true)
    }

    /// Settled sessions whose order push was lost to a failure
    pub async fn unsynced_settled(&self, limit: i64) -> AppResult<Vec<PaymentSession>> {
        Ok(self.sessions.list_unsynced_settled(limit).await?)
    }

    /// Retry the order push for a settled session
    pub async fn resync_order(&self, session: &PaymentSession) -> AppResult<bool> {
        self.sync_order(session).await
    }

    /// Sessions that are still PENDING after `older_than`
    pub async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<PaymentSession>> {
        Ok(self.sessions.list_pending_before(older_than, limit).await?)
    }

    /// Fetch a session's processor view with the resolution timeout
    pub async fn fetch_remote(
        &self,
        processor_session_id: &str,
    ) -> AppResult<ProcessorCheckoutSession> {
        match tokio::time::timeout(
            self.settings.processor_timeout,
            self.processor.retrieve_checkout_session(processor_session_id),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(AppError::new(AppErrorKind::External(ExternalError::Timeout {
                service: "Payment processor".to_string(),
                timeout_secs: self.settings.processor_timeout.as_secs(),
            }))),
        }
    }
}
