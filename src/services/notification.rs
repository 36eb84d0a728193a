use crate::database::payment_session_repository::PaymentSession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub const PAYMENT_UPDATED: &str = "payment.updated";

/// Real-time fan-out to connected clients
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &str, room: &str, payload: serde_json::Value);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentUpdate {
    pub session_id: String,
    pub order_id: Option<String>,
    pub payee_id: Option<String>,
    pub status: String,
    pub gross_amount: i64,
    pub currency: String,
}

impl From<&PaymentSession> for PaymentUpdate {
    fn from(session: &PaymentSession) -> Self {
        Self {
            session_id: session.id.to_string(),
            order_id: session.order_id.clone(),
            payee_id: session.payee_id.clone(),
            status: session.status.as_str().to_string(),
            gross_amount: session.gross_amount,
            currency: session.currency.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NotificationService {
    publisher: Arc<dyn EventPublisher>,
}

impl NotificationService {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Announce a settled payment status to the order room and the payee room
    pub async fn payment_updated(&self, session: &PaymentSession) {
        let update = PaymentUpdate::from(session);
        let payload = serde_json::to_value(&update).unwrap_or_default();

        if let Some(order_id) = &session.order_id {
            self.publisher
                .publish(PAYMENT_UPDATED, &format!("order:{}", order_id), payload.clone())
                .await;
        }
        if let Some(payee_id) = &session.payee_id {
            self.publisher
                .publish(PAYMENT_UPDATED, &format!("payee:{}", payee_id), payload)
                .await;
        }
    }
}

/// Publisher that only writes structured logs
pub struct LoggingPublisher;

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn publish(&self, event: &str, room: &str, payload: serde_json::Value) {
        info!(event = %event, room = %room, payload = %payload, "🔔 NOTIFICATION published");
    }
}

/// Publisher that keeps everything it was given, for local runs and tests
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, String, serde_json::Value)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<(String, String, serde_json::Value)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &str, room: &str, payload: serde_json::Value) {
        self.published
            .lock()
            .await
            .push((event.to_string(), room.to_string(), payload));
    }
}
