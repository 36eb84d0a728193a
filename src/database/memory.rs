//! In-memory stores for local runs without PostgreSQL (`SKIP_EXTERNALS`) and
//! for tests. They honor the same conditional-write contracts as the
//! repositories.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::payee_account_repository::{AccountSnapshot, AccountStatus, PayeeAccount};
use crate::database::payment_session_repository::{
    EarningsTotals, NewPaymentSession, PaymentSession, SessionStatus,
};
use crate::database::repository::{
    PayeeAccountStore, PaymentSessionStore, StoreResult, WebhookEventStore,
};
use crate::database::webhook_repository::{
    WebhookEventRecord, STATUS_FAILED, STATUS_PROCESSED, STATUS_RECEIVED,
};
use crate::payments::types::PayeeKind;
use crate::services::fee_calculation::{FeePolicy, FeeSplit};

#[derive(Default)]
pub struct InMemoryPayeeAccountStore {
    accounts: RwLock<HashMap<String, PayeeAccount>>,
}

impl InMemoryPayeeAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_flags(account: &mut PayeeAccount, snapshot: &AccountSnapshot) {
    account.charges_enabled = snapshot.charges_enabled;
    account.payouts_enabled = snapshot.payouts_enabled;
    account.details_submitted = snapshot.details_submitted;
    account.requirements = snapshot.requirements.clone();
    account.disabled_reason = snapshot.disabled_reason.clone();
    account.last_status_check = Some(snapshot.observed_at);
    account.updated_at = Utc::now();
    if account.status != AccountStatus::Restricted {
        account.status = snapshot.status();
    }
}

#[async_trait]
impl PayeeAccountStore for InMemoryPayeeAccountStore {
    async fn get(&self, payee_id: &str) -> StoreResult<Option<PayeeAccount>> {
        Ok(self.accounts.read().await.get(payee_id).cloned())
    }

    async fn find_by_sub_account(&self, sub_account_id: &str) -> StoreResult<Option<PayeeAccount>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.sub_account_id.as_deref() == Some(sub_account_id))
            .cloned())
    }

    async fn upsert_onboarding(
        &self,
        payee_id: &str,
        kind: PayeeKind,
        snapshot: &AccountSnapshot,
    ) -> StoreResult<PayeeAccount> {
        let mut accounts = self.accounts.write().await;

        let taken = accounts.values().any(|a| {
            a.payee_id != payee_id && a.sub_account_id.as_deref() == Some(&snapshot.sub_account_id)
        });
        if taken {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payee_accounts_sub_account_id_key".to_string(),
            }));
        }

        let now = Utc::now();
        let account = accounts
            .entry(payee_id.to_string())
            .or_insert_with(|| PayeeAccount {
                payee_id: payee_id.to_string(),
                kind,
                sub_account_id: None,
                status: AccountStatus::NotConnected,
                charges_enabled: false,
                payouts_enabled: false,
                details_submitted: false,
                requirements: Vec::new(),
                disabled_reason: None,
                fee_policy: None,
                last_status_check: None,
                created_at: now,
                updated_at: now,
            });
        if account.sub_account_id.is_none() {
            account.sub_account_id = Some(snapshot.sub_account_id.clone());
        }
        apply_flags(account, snapshot);
        Ok(account.clone())
    }

    async fn apply_snapshot(&self, snapshot: &AccountSnapshot) -> StoreResult<Option<PayeeAccount>> {
        let mut accounts = self.accounts.write().await;
        let Some(account) = accounts
            .values_mut()
            .find(|a| a.sub_account_id.as_deref() == Some(&snapshot.sub_account_id))
        else {
            return Ok(None);
        };

        let stale = account
            .last_status_check
            .is_some_and(|seen| seen > snapshot.observed_at);
        if stale || account.status == AccountStatus::Restricted {
            return Ok(None);
        }
        apply_flags(account, snapshot);
        Ok(Some(account.clone()))
    }

    async fn mark_restricted(
        &self,
        sub_account_id: &str,
        reason: &str,
    ) -> StoreResult<Option<PayeeAccount>> {
        let mut accounts = self.accounts.write().await;
        let Some(account) = accounts
            .values_mut()
            .find(|a| a.sub_account_id.as_deref() == Some(sub_account_id))
        else {
            return Ok(None);
        };
        if account.status == AccountStatus::Restricted {
            return Ok(None);
        }
        account.status = AccountStatus::Restricted;
        account.charges_enabled = false;
        account.payouts_enabled = false;
        account.disabled_reason = Some(reason.to_string());
        account.updated_at = Utc::now();
        Ok(Some(account.clone()))
    }

    async fn set_fee_policy(
        &self,
        payee_id: &str,
        policy: Option<FeePolicy>,
    ) -> StoreResult<Option<PayeeAccount>> {
        let mut accounts = self.accounts.write().await;
        Ok(accounts.get_mut(payee_id).map(|account| {
            account.fee_policy = policy;
            account.updated_at = Utc::now();
            account.clone()
        }))
    }
}

#[derive(Default)]
pub struct InMemoryPaymentSessionStore {
    sessions: RwLock<HashMap<Uuid, PaymentSession>>,
}

impl InMemoryPaymentSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn unique_violation(constraint: &str) -> DatabaseError {
        DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: constraint.to_string(),
        })
    }

    fn materialize(session: NewPaymentSession) -> PaymentSession {
        PaymentSession {
            id: session.id,
            idempotency_token: session.idempotency_token,
            processor_session_id: session.processor_session_id,
            payment_intent_id: session.payment_intent_id,
            order_id: session.order_id,
            gross_amount: session.gross_amount,
            currency: session.currency,
            status: session.status,
            platform_fee: session.split.map(|s| s.platform_fee),
            net_amount: session.split.map(|s| s.net_amount),
            payee_id: session.payee_id,
            order_status_synced: None,
            created_at: session.created_at,
            updated_at: Utc::now(),
        }
    }

    fn check_unique(
        sessions: &HashMap<Uuid, PaymentSession>,
        candidate: &NewPaymentSession,
    ) -> StoreResult<()> {
        for existing in sessions.values() {
            if existing.id == candidate.id {
                return Err(Self::unique_violation("payment_sessions_pkey"));
            }
            if candidate.idempotency_token.is_some()
                && existing.idempotency_token == candidate.idempotency_token
            {
                return Err(Self::unique_violation("payment_sessions_idempotency_token_key"));
            }
            if candidate.processor_session_id.is_some()
                && existing.processor_session_id == candidate.processor_session_id
            {
                return Err(Self::unique_violation(
                    "payment_sessions_processor_session_id_key",
                ));
            }
            if candidate.payment_intent_id.is_some()
                && existing.payment_intent_id == candidate.payment_intent_id
            {
                return Err(Self::unique_violation("payment_sessions_payment_intent_id_key"));
            }
        }
        Ok(())
    }

    async fn find(&self, pred: impl Fn(&PaymentSession) -> bool) -> Option<PaymentSession> {
        self.sessions.read().await.values().find(|s| pred(s)).cloned()
    }

    async fn update(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut PaymentSession) -> bool,
    ) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id) else {
            return Ok(false);
        };
        let changed = apply(session);
        if changed {
            session.updated_at = Utc::now();
        }
        Ok(changed)
    }

    async fn backfill_unique(
        &self,
        id: Uuid,
        value: &str,
        field: fn(&mut PaymentSession) -> &mut Option<String>,
        constraint: &str,
    ) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        let taken = sessions
            .values_mut()
            .any(|s| s.id != id && field(s).as_deref() == Some(value));
        if taken {
            return Err(Self::unique_violation(constraint));
        }
        let Some(session) = sessions.get_mut(&id) else {
            return Ok(false);
        };
        let slot = field(session);
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(value.to_string());
        session.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl PaymentSessionStore for InMemoryPaymentSessionStore {
    async fn insert(&self, session: NewPaymentSession) -> StoreResult<PaymentSession> {
        let mut sessions = self.sessions.write().await;
        Self::check_unique(&sessions, &session)?;
        let stored = Self::materialize(session);
        sessions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn insert_or_get_by_processor_id(
        &self,
        session: NewPaymentSession,
    ) -> StoreResult<PaymentSession> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.values().find(|s| {
            s.processor_session_id.is_some()
                && s.processor_session_id == session.processor_session_id
        }) {
            return Ok(existing.clone());
        }
        Self::check_unique(&sessions, &session)?;
        let stored = Self::materialize(session);
        sessions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<PaymentSession>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn find_by_processor_session_id(
        &self,
        processor_session_id: &str,
    ) -> StoreResult<Option<PaymentSession>> {
        Ok(self
            .find(|s| s.processor_session_id.as_deref() == Some(processor_session_id))
            .await)
    }

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<PaymentSession>> {
        Ok(self
            .find(|s| s.idempotency_token.as_deref() == Some(token))
            .await)
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> StoreResult<Option<PaymentSession>> {
        Ok(self
            .find(|s| s.payment_intent_id.as_deref() == Some(payment_intent_id))
            .await)
    }

    async fn find_latest_by_order(&self, order_id: &str) -> StoreResult<Option<PaymentSession>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.order_id.as_deref() == Some(order_id))
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn find_untokened_near(
        &self,
        around: DateTime<Utc>,
        window_secs: i64,
    ) -> StoreResult<Vec<PaymentSession>> {
        let window = Duration::seconds(window_secs);
        let (lo, hi) = (around - window, around + window);
        let mut found: Vec<PaymentSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.idempotency_token.is_none() && s.created_at >= lo && s.created_at <= hi)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(10);
        Ok(found)
    }

    async fn backfill_processor_session_id(
        &self,
        id: Uuid,
        processor_session_id: &str,
    ) -> StoreResult<bool> {
        self.backfill_unique(
            id,
            processor_session_id,
            |s| &mut s.processor_session_id,
            "payment_sessions_processor_session_id_key",
        )
        .await
    }

    async fn backfill_token(&self, id: Uuid, token: &str) -> StoreResult<bool> {
        self.backfill_unique(
            id,
            token,
            |s| &mut s.idempotency_token,
            "payment_sessions_idempotency_token_key",
        )
        .await
    }

    async fn backfill_payment_intent(&self, id: Uuid, payment_intent_id: &str) -> StoreResult<bool> {
        self.backfill_unique(
            id,
            payment_intent_id,
            |s| &mut s.payment_intent_id,
            "payment_sessions_payment_intent_id_key",
        )
        .await
    }

    async fn attach_split(&self, id: Uuid, split: FeeSplit) -> StoreResult<bool> {
        self.update(id, |s| {
            if s.platform_fee.is_some() || s.net_amount.is_some() || split.gross() != s.gross_amount {
                return false;
            }
            s.platform_fee = Some(split.platform_fee);
            s.net_amount = Some(split.net_amount);
            true
        })
        .await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    ) -> StoreResult<bool> {
        self.update(id, |s| {
            if s.status != from {
                return false;
            }
            s.status = to;
            true
        })
        .await
    }

    async fn claim_order_sync(&self, id: Uuid, status: SessionStatus) -> StoreResult<bool> {
        self.update(id, |s| {
            if s.status != status || s.order_status_synced == Some(status) {
                return false;
            }
            s.order_status_synced = Some(status);
            true
        })
        .await
    }

    async fn release_order_sync(
        &self,
        id: Uuid,
        status: SessionStatus,
        previous: Option<SessionStatus>,
    ) -> StoreResult<bool> {
        self.update(id, |s| {
            if s.order_status_synced != Some(status) {
                return false;
            }
            s.order_status_synced = previous;
            true
        })
        .await
    }

    async fn list_pending_before(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<PaymentSession>> {
        let mut found: Vec<PaymentSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.status == SessionStatus::Pending && s.created_at < created_before)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn list_unsynced_settled(&self, limit: i64) -> StoreResult<Vec<PaymentSession>> {
        let mut found: Vec<PaymentSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.status != SessionStatus::Pending && s.order_status_synced != Some(s.status))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.updated_at);
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn earnings_totals(
        &self,
        payee_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> StoreResult<EarningsTotals> {
        let sessions = self.sessions.read().await;
        let mut totals = EarningsTotals::default();
        for s in sessions.values().filter(|s| {
            s.payee_id.as_deref() == Some(payee_id)
                && s.status == SessionStatus::Paid
                && from.map_or(true, |f| s.created_at >= f)
                && to.map_or(true, |t| s.created_at <= t)
        }) {
            totals.gross += s.gross_amount;
            totals.platform_fees += s.platform_fee.unwrap_or(0);
            totals.net += s.net_amount.unwrap_or(0);
            totals.count += 1;
        }
        Ok(totals)
    }
}

#[derive(Default)]
pub struct InMemoryWebhookEventStore {
    events: RwLock<HashMap<String, WebhookEventRecord>>,
}

impl InMemoryWebhookEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update_by_id(&self, id: Uuid, apply: impl FnOnce(&mut WebhookEventRecord)) {
        let mut events = self.events.write().await;
        if let Some(record) = events.values_mut().find(|e| e.id == id) {
            apply(record);
        }
    }
}

#[async_trait]
impl WebhookEventStore for InMemoryWebhookEventStore {
    async fn log_event(
        &self,
        event_id: &str,
        event_type: &str,
        payload: JsonValue,
    ) -> StoreResult<WebhookEventRecord> {
        let mut events = self.events.write().await;
        let record = events
            .entry(event_id.to_string())
            .or_insert_with(|| WebhookEventRecord {
                id: Uuid::new_v4(),
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                payload,
                status: STATUS_RECEIVED.to_string(),
                retry_count: 0,
                last_error: None,
                received_at: Utc::now(),
                processed_at: None,
            });
        Ok(record.clone())
    }

    async fn mark_processed(&self, id: Uuid) -> StoreResult<()> {
        self.update_by_id(id, |record| {
            record.status = STATUS_PROCESSED.to_string();
            record.processed_at = Some(Utc::now());
            record.last_error = None;
        })
        .await;
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> StoreResult<()> {
        self.update_by_id(id, |record| {
            if record.status != STATUS_PROCESSED {
                record.status = STATUS_FAILED.to_string();
                record.retry_count += 1;
                record.last_error = Some(error.to_string());
            }
        })
        .await;
        Ok(())
    }

    async fn get_pending_events(
        &self,
        limit: i64,
        max_retries: i32,
    ) -> StoreResult<Vec<WebhookEventRecord>> {
        let mut pending: Vec<WebhookEventRecord> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.status == STATUS_FAILED && e.retry_count < max_retries)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.received_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(token: &str) -> NewPaymentSession {
        NewPaymentSession {
            id: Uuid::new_v4(),
            idempotency_token: Some(token.to_string()),
            processor_session_id: None,
            payment_intent_id: None,
            order_id: Some("order_1".to_string()),
            gross_amount: 4998,
            currency: "usd".to_string(),
            status: SessionStatus::Pending,
            split: Some(FeeSplit {
                platform_fee: 250,
                net_amount: 4748,
            }),
            payee_id: Some("biz_1".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn conditional_transition_only_applies_once() {
        let store = InMemoryPaymentSessionStore::new();
        let session = store.insert(new_session("pst_a")).await.unwrap();

        assert!(store
            .transition(session.id, SessionStatus::Pending, SessionStatus::Paid)
            .await
            .unwrap());
        assert!(!store
            .transition(session.id, SessionStatus::Pending, SessionStatus::Failed)
            .await
            .unwrap());
        assert_eq!(
            store.get(session.id).await.unwrap().unwrap().status,
            SessionStatus::Paid
        );
    }

    #[tokio::test]
    async fn duplicate_token_is_a_unique_violation() {
        let store = InMemoryPaymentSessionStore::new();
        store.insert(new_session("pst_dup")).await.unwrap();
        let err = store.insert(new_session("pst_dup")).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn backfill_never_overwrites() {
        let store = InMemoryPaymentSessionStore::new();
        let session = store.insert(new_session("pst_b")).await.unwrap();

        assert!(store
            .backfill_processor_session_id(session.id, "cs_first")
            .await
            .unwrap());
        assert!(!store
            .backfill_processor_session_id(session.id, "cs_second")
            .await
            .unwrap());
        assert_eq!(
            store
                .find_by_processor_session_id("cs_first")
                .await
                .unwrap()
                .map(|s| s.id),
            Some(session.id)
        );
    }

    #[tokio::test]
    async fn order_sync_claim_has_one_winner() {
        let store = InMemoryPaymentSessionStore::new();
        let session = store.insert(new_session("pst_c")).await.unwrap();
        store
            .transition(session.id, SessionStatus::Pending, SessionStatus::Paid)
            .await
            .unwrap();

        assert!(store.claim_order_sync(session.id, SessionStatus::Paid).await.unwrap());
        assert!(!store.claim_order_sync(session.id, SessionStatus::Paid).await.unwrap());

        assert!(store
            .release_order_sync(session.id, SessionStatus::Paid, None)
            .await
            .unwrap());
        assert!(store.claim_order_sync(session.id, SessionStatus::Paid).await.unwrap());
    }

    #[tokio::test]
    async fn stale_account_snapshot_is_ignored() {
        let store = InMemoryPayeeAccountStore::new();
        let now = Utc::now();
        let newer = AccountSnapshot {
            sub_account_id: "acct_1".to_string(),
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
            requirements: vec![],
            disabled_reason: None,
            observed_at: now,
        };
        store
            .upsert_onboarding("biz_1", PayeeKind::Business, &newer)
            .await
            .unwrap();

        let older = AccountSnapshot {
            charges_enabled: false,
            observed_at: now - Duration::seconds(30),
            ..newer.clone()
        };
        assert!(store.apply_snapshot(&older).await.unwrap().is_none());
        assert_eq!(
            store.get("biz_1").await.unwrap().unwrap().status,
            AccountStatus::Active
        );
    }

    #[tokio::test]
    async fn webhook_ledger_returns_existing_record() {
        let store = InMemoryWebhookEventStore::new();
        let first = store
            .log_event("evt_1", "account.updated", JsonValue::Null)
            .await
            .unwrap();
        store.mark_processed(first.id).await.unwrap();

        let again = store
            .log_event("evt_1", "account.updated", JsonValue::Null)
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert!(again.is_processed());
    }
}
