use crate::database::error::DatabaseError;
use crate::database::repository::{StoreResult, WebhookEventStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

pub const STATUS_RECEIVED: &str = "received";
pub const STATUS_PROCESSED: &str = "processed";
pub const STATUS_FAILED: &str = "failed";

/// Ledger entry for one processor event
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub status: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEventRecord {
    pub fn is_processed(&self) -> bool {
        self.status == STATUS_PROCESSED
    }
}

/// Repository for the processed-event ledger
pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventStore for WebhookRepository {
    async fn log_event(
        &self,
        event_id: &str,
        event_type: &str,
        payload: JsonValue,
    ) -> StoreResult<WebhookEventRecord> {
        // The no-op update makes RETURNING yield the existing row on conflict
        sqlx::query_as::<_, WebhookEventRecord>(
            "INSERT INTO webhook_events (event_id, event_type, payload, status)
             VALUES ($1, $2, $3, 'received')
             ON CONFLICT (event_id) DO UPDATE SET event_id = EXCLUDED.event_id
             RETURNING id, event_id, event_type, payload, status, retry_count, last_error,
                       received_at, processed_at",
        )
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn mark_processed(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE webhook_events SET status = 'processed', processed_at = NOW(), last_error = NULL
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE webhook_events
             SET status = 'failed', retry_count = retry_count + 1, last_error = $2
             WHERE id = $1 AND status <> 'processed'",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn get_pending_events(
        &self,
        limit: i64,
        max_retries: i32,
    ) -> StoreResult<Vec<WebhookEventRecord>> {
        sqlx::query_as::<_, WebhookEventRecord>(
            "SELECT id, event_id, event_type, payload, status, retry_count, last_error,
                    received_at, processed_at
             FROM webhook_events
             WHERE status = 'failed' AND retry_count < $2
             ORDER BY received_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
