use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{PaymentSessionStore, StoreResult};
use crate::services::fee_calculation::FeeSplit;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Lifecycle of a checkout session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Outcome of checking a requested status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    Apply,
    /// Already at the requested status
    NoOp,
    Invalid,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Paid => "PAID",
            SessionStatus::Failed => "FAILED",
            SessionStatus::Refunded => "REFUNDED",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "PENDING" => Some(SessionStatus::Pending),
            "PAID" => Some(SessionStatus::Paid),
            "FAILED" => Some(SessionStatus::Failed),
            "REFUNDED" => Some(SessionStatus::Refunded),
            _ => None,
        }
    }

    pub fn valid_transitions(&self) -> &'static [SessionStatus] {
        match self {
            SessionStatus::Pending => &[SessionStatus::Paid, SessionStatus::Failed],
            SessionStatus::Paid => &[SessionStatus::Refunded],
            SessionStatus::Failed | SessionStatus::Refunded => &[],
        }
    }

    pub fn check_transition(&self, to: SessionStatus) -> TransitionCheck {
        if *self == to {
            TransitionCheck::NoOp
        } else if self.valid_transitions().contains(&to) {
            TransitionCheck::Apply
        } else {
            TransitionCheck::Invalid
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub id: Uuid,
    pub idempotency_token: Option<String>,
    pub processor_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub order_id: Option<String>,
    pub gross_amount: i64,
    pub currency: String,
    pub status: SessionStatus,
    pub platform_fee: Option<i64>,
    pub net_amount: Option<i64>,
    pub payee_id: Option<String>,
    #[serde(skip)]
    pub order_status_synced: Option<SessionStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentSession {
    pub fn split(&self) -> Option<FeeSplit> {
        match (self.platform_fee, self.net_amount) {
            (Some(platform_fee), Some(net_amount)) => Some(FeeSplit {
                platform_fee,
                net_amount,
            }),
            _ => None,
        }
    }
}

/// Row to insert
#[derive(Debug, Clone)]
pub struct NewPaymentSession {
    pub id: Uuid,
    pub idempotency_token: Option<String>,
    pub processor_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub order_id: Option<String>,
    pub gross_amount: i64,
    pub currency: String,
    pub status: SessionStatus,
    pub split: Option<FeeSplit>,
    pub payee_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregates over a payee's PAID sessions, minor units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct EarningsTotals {
    pub gross: i64,
    pub platform_fees: i64,
    pub net: i64,
    pub count: i64,
}

#[derive(Debug, Clone, FromRow)]
struct PaymentSessionRow {
    id: Uuid,
    idempotency_token: Option<String>,
    processor_session_id: Option<String>,
    payment_intent_id: Option<String>,
    order_id: Option<String>,
    gross_amount: i64,
    currency: String,
    status: String,
    platform_fee: Option<i64>,
    net_amount: Option<i64>,
    payee_id: Option<String>,
    order_status_synced: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentSessionRow> for PaymentSession {
    type Error = DatabaseError;

    fn try_from(row: PaymentSessionRow) -> Result<Self, Self::Error> {
        let status = SessionStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("unknown payment session status '{}'", row.status),
            })
        })?;

        Ok(PaymentSession {
            id: row.id,
            idempotency_token: row.idempotency_token,
            processor_session_id: row.processor_session_id,
            payment_intent_id: row.payment_intent_id,
            order_id: row.order_id,
            gross_amount: row.gross_amount,
            currency: row.currency,
            status,
            platform_fee: row.platform_fee,
            net_amount: row.net_amount,
            payee_id: row.payee_id,
            order_status_synced: row
                .order_status_synced
                .as_deref()
                .and_then(SessionStatus::from_db_status),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "id, idempotency_token, processor_session_id, payment_intent_id, order_id, \
     gross_amount, currency, status, platform_fee, net_amount, payee_id, order_status_synced, \
     created_at, updated_at";

fn into_sessions(rows: Vec<PaymentSessionRow>) -> StoreResult<Vec<PaymentSession>> {
    rows.into_iter().map(PaymentSession::try_from).collect()
}

/// Repository for payment sessions
pub struct PaymentSessionRepository {
    pool: PgPool,
}

impl PaymentSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one_by(&self, column: &str, value: &str) -> StoreResult<Option<PaymentSession>> {
        let query = format!("SELECT {} FROM payment_sessions WHERE {} = $1", COLUMNS, column);
        sqlx::query_as::<_, PaymentSessionRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentSession::try_from)
            .transpose()
    }

    async fn backfill(&self, id: Uuid, column: &str, value: &str) -> StoreResult<bool> {
        let query = format!(
            "UPDATE payment_sessions SET {col} = $2, updated_at = NOW()
             WHERE id = $1 AND {col} IS NULL",
            col = column
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    fn insert_query(conflict_clause: &str) -> String {
        format!(
            "INSERT INTO payment_sessions
                (id, idempotency_token, processor_session_id, payment_intent_id, order_id,
                 gross_amount, currency, status, platform_fee, net_amount, payee_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             {}
             RETURNING {}",
            conflict_clause, COLUMNS
        )
    }

    fn bind_new<'q>(
        query: sqlx::query::QueryAs<'q, sqlx::Postgres, PaymentSessionRow, sqlx::postgres::PgArguments>,
        session: &'q NewPaymentSession,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, PaymentSessionRow, sqlx::postgres::PgArguments>
    {
        query
            .bind(session.id)
            .bind(&session.idempotency_token)
            .bind(&session.processor_session_id)
            .bind(&session.payment_intent_id)
            .bind(&session.order_id)
            .bind(session.gross_amount)
            .bind(&session.currency)
            .bind(session.status.as_str())
            .bind(session.split.map(|s| s.platform_fee))
            .bind(session.split.map(|s| s.net_amount))
            .bind(&session.payee_id)
            .bind(session.created_at)
    }
}

#[async_trait]
impl PaymentSessionStore for PaymentSessionRepository {
    async fn insert(&self, session: NewPaymentSession) -> StoreResult<PaymentSession> {
        let query = Self::insert_query("");
        let row = Self::bind_new(sqlx::query_as::<_, PaymentSessionRow>(&query), &session)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        PaymentSession::try_from(row)
    }

    async fn insert_or_get_by_processor_id(
        &self,
        session: NewPaymentSession,
    ) -> StoreResult<PaymentSession> {
        let query = Self::insert_query("ON CONFLICT (processor_session_id) DO NOTHING");
        let inserted = Self::bind_new(sqlx::query_as::<_, PaymentSessionRow>(&query), &session)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        if let Some(row) = inserted {
            return PaymentSession::try_from(row);
        }

        let processor_session_id = session.processor_session_id.as_deref().unwrap_or_default();
        self.find_by_processor_session_id(processor_session_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("PaymentSession", processor_session_id))
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<PaymentSession>> {
        let query = format!("SELECT {} FROM payment_sessions WHERE id = $1", COLUMNS);
        sqlx::query_as::<_, PaymentSessionRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentSession::try_from)
            .transpose()
    }

    async fn find_by_processor_session_id(
        &self,
        processor_session_id: &str,
    ) -> StoreResult<Option<PaymentSession>> {
        self.find_one_by("processor_session_id", processor_session_id)
            .await
    }

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<PaymentSession>> {
        self.find_one_by("idempotency_token", token).await
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> StoreResult<Option<PaymentSession>> {
        self.find_one_by("payment_intent_id", payment_intent_id)
            .await
    }

    async fn find_latest_by_order(&self, order_id: &str) -> StoreResult<Option<PaymentSession>> {
        let query = format!(
            "SELECT {} FROM payment_sessions WHERE order_id = $1
             ORDER BY created_at DESC LIMIT 1",
            COLUMNS
        );
        sqlx::query_as::<_, PaymentSessionRow>(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentSession::try_from)
            .transpose()
    }

    async fn find_untokened_near(
        &self,
        around: DateTime<Utc>,
        window_secs: i64,
    ) -> StoreResult<Vec<PaymentSession>> {
        let window = Duration::seconds(window_secs);
        let query = format!(
            "SELECT {} FROM payment_sessions
             WHERE idempotency_token IS NULL AND created_at BETWEEN $1 AND $2
             ORDER BY created_at DESC LIMIT 10",
            COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentSessionRow>(&query)
            .bind(around - window)
            .bind(around + window)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        into_sessions(rows)
    }

    async fn backfill_processor_session_id(
        &self,
        id: Uuid,
        processor_session_id: &str,
    ) -> StoreResult<bool> {
        self.backfill(id, "processor_session_id", processor_session_id)
            .await
    }

    async fn backfill_token(&self, id: Uuid, token: &str) -> StoreResult<bool> {
        self.backfill(id, "idempotency_token", token).await
    }

    async fn backfill_payment_intent(&self, id: Uuid, payment_intent_id: &str) -> StoreResult<bool> {
        self.backfill(id, "payment_intent_id", payment_intent_id)
            .await
    }

    async fn attach_split(&self, id: Uuid, split: FeeSplit) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE payment_sessions
             SET platform_fee = $2, net_amount = $3, updated_at = NOW()
             WHERE id = $1 AND platform_fee IS NULL AND net_amount IS NULL
               AND gross_amount = $2 + $3",
        )
        .bind(id)
        .bind(split.platform_fee)
        .bind(split.net_amount)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE payment_sessions SET status = $3, updated_at = NOW()
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_order_sync(&self, id: Uuid, status: SessionStatus) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE payment_sessions SET order_status_synced = $2
             WHERE id = $1 AND status = $2 AND order_status_synced IS DISTINCT FROM $2",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_order_sync(
        &self,
        id: Uuid,
        status: SessionStatus,
        previous: Option<SessionStatus>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE payment_sessions SET order_status_synced = $3
             WHERE id = $1 AND order_status_synced = $2",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(previous.map(|s| s.as_str()))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_pending_before(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<PaymentSession>> {
        let query = format!(
            "SELECT {} FROM payment_sessions
             WHERE status = 'PENDING' AND created_at < $1
             ORDER BY created_at ASC LIMIT $2",
            COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentSessionRow>(&query)
            .bind(created_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        into_sessions(rows)
    }

    async fn list_unsynced_settled(&self, limit: i64) -> StoreResult<Vec<PaymentSession>> {
        let query = format!(
            "SELECT {} FROM payment_sessions
             WHERE status <> 'PENDING' AND order_status_synced IS DISTINCT FROM status
             ORDER BY updated_at ASC LIMIT $1",
            COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentSessionRow>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        into_sessions(rows)
    }

    async fn earnings_totals(
        &self,
        payee_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> StoreResult<EarningsTotals> {
        sqlx::query_as::<_, EarningsTotals>(
            "SELECT COALESCE(SUM(gross_amount), 0)::BIGINT AS gross,
                    COALESCE(SUM(platform_fee), 0)::BIGINT AS platform_fees,
                    COALESCE(SUM(net_amount), 0)::BIGINT AS net,
                    COUNT(*)::BIGINT AS count
             FROM payment_sessions
             WHERE payee_id = $1 AND status = 'PAID'
               AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2)
               AND ($3::TIMESTAMPTZ IS NULL OR created_at <= $3)",
        )
        .bind(payee_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
