use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{PayeeAccountStore, StoreResult};
use crate::payments::types::{PayeeKind, ProcessorAccount};
use crate::services::fee_calculation::FeePolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// Onboarding state of a payee sub-account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    NotConnected,
    Pending,
    Active,
    Restricted,
    Rejected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::NotConnected => "NOT_CONNECTED",
            AccountStatus::Pending => "PENDING",
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Restricted => "RESTRICTED",
            AccountStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "NOT_CONNECTED" => Some(AccountStatus::NotConnected),
            "PENDING" => Some(AccountStatus::Pending),
            "ACTIVE" => Some(AccountStatus::Active),
            "RESTRICTED" => Some(AccountStatus::Restricted),
            "REJECTED" => Some(AccountStatus::Rejected),
            _ => None,
        }
    }

    /// A disablement reason wins; otherwise all three capabilities mean ACTIVE.
    pub fn derive(
        details_submitted: bool,
        charges_enabled: bool,
        payouts_enabled: bool,
        disabled_reason: Option<&str>,
    ) -> Self {
        if disabled_reason.is_some_and(|r| !r.trim().is_empty()) {
            AccountStatus::Rejected
        } else if details_submitted && charges_enabled && payouts_enabled {
            AccountStatus::Active
        } else {
            AccountStatus::Pending
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags observed at the processor at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub sub_account_id: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub requirements: Vec<String>,
    pub disabled_reason: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn from_processor(account: &ProcessorAccount, observed_at: DateTime<Utc>) -> Self {
        Self {
            sub_account_id: account.id.clone(),
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            details_submitted: account.details_submitted,
            requirements: account.requirements.currently_due.clone(),
            disabled_reason: account.requirements.disabled_reason.clone(),
            observed_at,
        }
    }

    pub fn status(&self) -> AccountStatus {
        AccountStatus::derive(
            self.details_submitted,
            self.charges_enabled,
            self.payouts_enabled,
            self.disabled_reason.as_deref(),
        )
    }
}

/// A payee's link to the processor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayeeAccount {
    pub payee_id: String,
    pub kind: PayeeKind,
    pub sub_account_id: Option<String>,
    pub status: AccountStatus,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub requirements: Vec<String>,
    pub disabled_reason: Option<String>,
    pub fee_policy: Option<FeePolicy>,
    pub last_status_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct PayeeAccountRow {
    payee_id: String,
    kind: String,
    sub_account_id: Option<String>,
    status: String,
    charges_enabled: bool,
    payouts_enabled: bool,
    details_submitted: bool,
    requirements: serde_json::Value,
    disabled_reason: Option<String>,
    fee_policy_kind: Option<String>,
    fee_policy_value: Option<Decimal>,
    last_status_check: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PayeeAccountRow> for PayeeAccount {
    type Error = DatabaseError;

    fn try_from(row: PayeeAccountRow) -> Result<Self, Self::Error> {
        let status = AccountStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("unknown payee account status '{}'", row.status),
            })
        })?;
        let kind = PayeeKind::parse(&row.kind).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("unknown payee kind '{}'", row.kind),
            })
        })?;
        let fee_policy = match (row.fee_policy_kind.as_deref(), row.fee_policy_value) {
            (Some(k), Some(v)) => FeePolicy::from_parts(k, v),
            _ => None,
        };

        Ok(PayeeAccount {
            payee_id: row.payee_id,
            kind,
            sub_account_id: row.sub_account_id,
            status,
            charges_enabled: row.charges_enabled,
            payouts_enabled: row.payouts_enabled,
            details_submitted: row.details_submitted,
            requirements: serde_json::from_value(row.requirements).unwrap_or_default(),
            disabled_reason: row.disabled_reason,
            fee_policy,
            last_status_check: row.last_status_check,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "payee_id, kind, sub_account_id, status, charges_enabled, payouts_enabled, \
     details_submitted, requirements, disabled_reason, fee_policy_kind, fee_policy_value, \
     last_status_check, created_at, updated_at";

/// Repository for payee accounts
pub struct PayeeAccountRepository {
    pool: PgPool,
}

impl PayeeAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(
        &self,
        query: String,
        key: &str,
    ) -> StoreResult<Option<PayeeAccount>> {
        sqlx::query_as::<_, PayeeAccountRow>(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PayeeAccount::try_from)
            .transpose()
    }
}

#[async_trait]
impl PayeeAccountStore for PayeeAccountRepository {
    async fn get(&self, payee_id: &str) -> StoreResult<Option<PayeeAccount>> {
        self.fetch_optional(
            format!("SELECT {} FROM payee_accounts WHERE payee_id = $1", COLUMNS),
            payee_id,
        )
        .await
    }

    async fn find_by_sub_account(&self, sub_account_id: &str) -> StoreResult<Option<PayeeAccount>> {
        self.fetch_optional(
            format!("SELECT {} FROM payee_accounts WHERE sub_account_id = $1", COLUMNS),
            sub_account_id,
        )
        .await
    }

    async fn upsert_onboarding(
        &self,
        payee_id: &str,
        kind: PayeeKind,
        snapshot: &AccountSnapshot,
    ) -> StoreResult<PayeeAccount> {
        let query = format!(
            "INSERT INTO payee_accounts
                (payee_id, kind, sub_account_id, status, charges_enabled, payouts_enabled,
                 details_submitted, requirements, disabled_reason, last_status_check)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (payee_id) DO UPDATE SET
                sub_account_id = COALESCE(payee_accounts.sub_account_id, EXCLUDED.sub_account_id),
                status = CASE WHEN payee_accounts.status = 'RESTRICTED'
                              THEN payee_accounts.status ELSE EXCLUDED.status END,
                charges_enabled = EXCLUDED.charges_enabled,
                payouts_enabled = EXCLUDED.payouts_enabled,
                details_submitted = EXCLUDED.details_submitted,
                requirements = EXCLUDED.requirements,
                disabled_reason = EXCLUDED.disabled_reason,
                last_status_check = EXCLUDED.last_status_check,
                updated_at = NOW()
             RETURNING {}",
            COLUMNS
        );

        let row = sqlx::query_as::<_, PayeeAccountRow>(&query)
            .bind(payee_id)
            .bind(kind.as_str())
            .bind(&snapshot.sub_account_id)
            .bind(snapshot.status().as_str())
            .bind(snapshot.charges_enabled)
            .bind(snapshot.payouts_enabled)
            .bind(snapshot.details_submitted)
            .bind(serde_json::json!(snapshot.requirements))
            .bind(&snapshot.disabled_reason)
            .bind(snapshot.observed_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        PayeeAccount::try_from(row)
    }

    async fn apply_snapshot(&self, snapshot: &AccountSnapshot) -> StoreResult<Option<PayeeAccount>> {
        let query = format!(
            "UPDATE payee_accounts
             SET status = $2, charges_enabled = $3, payouts_enabled = $4,
                 details_submitted = $5, requirements = $6, disabled_reason = $7,
                 last_status_check = $8, updated_at = NOW()
             WHERE sub_account_id = $1
               AND status <> 'RESTRICTED'
               AND (last_status_check IS NULL OR last_status_check <= $8)
             RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, PayeeAccountRow>(&query)
            .bind(&snapshot.sub_account_id)
            .bind(snapshot.status().as_str())
            .bind(snapshot.charges_enabled)
            .bind(snapshot.payouts_enabled)
            .bind(snapshot.details_submitted)
            .bind(serde_json::json!(snapshot.requirements))
            .bind(&snapshot.disabled_reason)
            .bind(snapshot.observed_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PayeeAccount::try_from)
            .transpose()
    }

    async fn mark_restricted(
        &self,
        sub_account_id: &str,
        reason: &str,
    ) -> StoreResult<Option<PayeeAccount>> {
        let query = format!(
            "UPDATE payee_accounts
             SET status = 'RESTRICTED', charges_enabled = FALSE, payouts_enabled = FALSE,
                 disabled_reason = $2, updated_at = NOW()
             WHERE sub_account_id = $1 AND status <> 'RESTRICTED'
             RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, PayeeAccountRow>(&query)
            .bind(sub_account_id)
            .bind(reason)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PayeeAccount::try_from)
            .transpose()
    }

    async fn set_fee_policy(
        &self,
        payee_id: &str,
        policy: Option<FeePolicy>,
    ) -> StoreResult<Option<PayeeAccount>> {
        let query = format!(
            "UPDATE payee_accounts
             SET fee_policy_kind = $2, fee_policy_value = $3, updated_at = NOW()
             WHERE payee_id = $1
             RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, PayeeAccountRow>(&query)
            .bind(payee_id)
            .bind(policy.map(|p| p.kind_str()))
            .bind(policy.map(|p| p.value()))
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PayeeAccount::try_from)
            .transpose()
    }
}
