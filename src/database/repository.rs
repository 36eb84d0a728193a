//! Store traits shared by the PostgreSQL repositories and the in-memory stores.
//!
//! Every status write is conditional on the expected current value and every
//! cross-reference backfill is conditional on the column being empty. A `false`
//! return means another writer got there first; callers re-read rather than
//! treating it as a failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::payee_account_repository::{AccountSnapshot, PayeeAccount};
use crate::database::payment_session_repository::{
    EarningsTotals, NewPaymentSession, PaymentSession, SessionStatus,
};
use crate::database::webhook_repository::WebhookEventRecord;
use crate::payments::types::PayeeKind;
use crate::services::fee_calculation::{FeePolicy, FeeSplit};

pub type StoreResult<T> = Result<T, DatabaseError>;

#[async_trait]
pub trait PayeeAccountStore: Send + Sync {
    async fn get(&self, payee_id: &str) -> StoreResult<Option<PayeeAccount>>;

    async fn find_by_sub_account(&self, sub_account_id: &str) -> StoreResult<Option<PayeeAccount>>;

    /// Record the sub-account for a payee, creating the row on first use.
    /// An existing sub-account id is never replaced and RESTRICTED is kept.
    async fn upsert_onboarding(
        &self,
        payee_id: &str,
        kind: PayeeKind,
        snapshot: &AccountSnapshot,
    ) -> StoreResult<PayeeAccount>;

    /// Apply a processor status observation unless a newer one was already
    /// recorded or the account is RESTRICTED. Returns the updated row.
    async fn apply_snapshot(&self, snapshot: &AccountSnapshot) -> StoreResult<Option<PayeeAccount>>;

    async fn mark_restricted(
        &self,
        sub_account_id: &str,
        reason: &str,
    ) -> StoreResult<Option<PayeeAccount>>;

    async fn set_fee_policy(
        &self,
        payee_id: &str,
        policy: Option<FeePolicy>,
    ) -> StoreResult<Option<PayeeAccount>>;
}

#[async_trait]
pub trait PaymentSessionStore: Send + Sync {
    /// Fails with a unique violation if the token or processor id is taken
    async fn insert(&self, session: NewPaymentSession) -> StoreResult<PaymentSession>;

    /// Insert keyed on processor session id, returning the existing row if
    /// another writer materialized it first
    async fn insert_or_get_by_processor_id(
        &self,
        session: NewPaymentSession,
    ) -> StoreResult<PaymentSession>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<PaymentSession>>;

    async fn find_by_processor_session_id(&self, processor_session_id: &str)
        -> StoreResult<Option<PaymentSession>>;

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<PaymentSession>>;

    async fn find_by_payment_intent(&self, payment_intent_id: &str)
        -> StoreResult<Option<PaymentSession>>;

    async fn find_latest_by_order(&self, order_id: &str) -> StoreResult<Option<PaymentSession>>;

    /// Sessions without an idempotency token created within `window_secs` of `around`
    async fn find_untokened_near(
        &self,
        around: DateTime<Utc>,
        window_secs: i64,
    ) -> StoreResult<Vec<PaymentSession>>;

    async fn backfill_processor_session_id(&self, id: Uuid, processor_session_id: &str)
        -> StoreResult<bool>;

    async fn backfill_token(&self, id: Uuid, token: &str) -> StoreResult<bool>;

    async fn backfill_payment_intent(&self, id: Uuid, payment_intent_id: &str) -> StoreResult<bool>;

    /// Attach a split only if none is recorded yet
    async fn attach_split(&self, id: Uuid, split: FeeSplit) -> StoreResult<bool>;

    /// `UPDATE ... SET status = to WHERE id = ? AND status = from`
    async fn transition(&self, id: Uuid, from: SessionStatus, to: SessionStatus)
        -> StoreResult<bool>;

    /// Claim the right to push `status` to the order subsystem. Only one
    /// caller wins per status.
    async fn claim_order_sync(&self, id: Uuid, status: SessionStatus) -> StoreResult<bool>;

    /// Undo a claim after the push failed
    async fn release_order_sync(
        &self,
        id: Uuid,
        status: SessionStatus,
        previous: Option<SessionStatus>,
    ) -> StoreResult<bool>;

    async fn list_pending_before(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<PaymentSession>>;

    /// Settled sessions whose current status never reached the order subsystem
    async fn list_unsynced_settled(&self, limit: i64) -> StoreResult<Vec<PaymentSession>>;

    /// Totals over PAID sessions for a payee, optionally bounded by creation time
    async fn earnings_totals(
        &self,
        payee_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> StoreResult<EarningsTotals>;
}

#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    /// Record a verified event, or return the existing record for its id
    async fn log_event(
        &self,
        event_id: &str,
        event_type: &str,
        payload: JsonValue,
    ) -> StoreResult<WebhookEventRecord>;

    async fn mark_processed(&self, id: Uuid) -> StoreResult<()>;

    async fn record_failure(&self, id: Uuid, error: &str) -> StoreResult<()>;

    async fn get_pending_events(&self, limit: i64, max_retries: i32)
        -> StoreResult<Vec<WebhookEventRecord>>;
}
