//! Narrow interface onto the order subsystem: read an order, write its
//! payment status. Nothing else about orders is owned here.

use crate::database::payment_session_repository::SessionStatus;
use crate::error::{AppError, AppErrorKind, ExternalError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    /// Minor units
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub payment_status: Option<String>,
}

impl Order {
    pub fn is_paid(&self) -> bool {
        self.payment_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(SessionStatus::Paid.as_str()))
    }
}

#[derive(Debug, Clone, Error)]
pub enum OrderError {
    #[error("order {0} not found")]
    NotFound(String),

    #[error("order service unavailable: {0}")]
    Unavailable(String),
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound(order_id) => {
                AppError::domain(crate::error::DomainError::OrderNotFound { order_id })
            }
            OrderError::Unavailable(message) => {
                AppError::new(AppErrorKind::External(ExternalError::OrderService { message }))
            }
        }
    }
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn get_order(&self, order_id: &str) -> Result<Order, OrderError>;

    async fn set_payment_status(&self, order_id: &str, status: SessionStatus)
        -> Result<(), OrderError>;
}

/// Order subsystem reached over HTTP
pub struct HttpOrderGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrderGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OrderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrderError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl OrderGateway for HttpOrderGateway {
    async fn get_order(&self, order_id: &str) -> Result<Order, OrderError> {
        let response = self
            .client
            .get(format!("{}/orders/{}", self.base_url, order_id))
            .send()
            .await
            .map_err(|e| OrderError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(OrderError::NotFound(order_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(OrderError::Unavailable(format!("HTTP {}", response.status())));
        }
        response
            .json::<Order>()
            .await
            .map_err(|e| OrderError::Unavailable(format!("invalid order payload: {}", e)))
    }

    async fn set_payment_status(
        &self,
        order_id: &str,
        status: SessionStatus,
    ) -> Result<(), OrderError> {
        let response = self
            .client
            .patch(format!("{}/orders/{}/payment-status", self.base_url, order_id))
            .json(&serde_json::json!({ "paymentStatus": status.as_str() }))
            .send()
            .await
            .map_err(|e| OrderError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(OrderError::NotFound(order_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(OrderError::Unavailable(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}

/// Order book held in memory. With `accept_unknown`, any order id is treated
/// as an existing unpaid order.
#[derive(Default)]
pub struct InMemoryOrderGateway {
    orders: RwLock<HashMap<String, Order>>,
    status_writes: Mutex<Vec<(String, SessionStatus)>>,
    accept_unknown: bool,
}

impl InMemoryOrderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepting_unknown_orders() -> Self {
        Self {
            accept_unknown: true,
            ..Self::default()
        }
    }

    pub async fn insert(&self, order: Order) {
        self.orders.write().await.insert(order.id.clone(), order);
    }

    /// Every status write received, in order
    pub async fn status_writes(&self) -> Vec<(String, SessionStatus)> {
        self.status_writes.lock().await.clone()
    }
}

#[async_trait]
impl OrderGateway for InMemoryOrderGateway {
    async fn get_order(&self, order_id: &str) -> Result<Order, OrderError> {
        match self.orders.read().await.get(order_id) {
            Some(order) => Ok(order.clone()),
            None if self.accept_unknown => Ok(Order {
                id: order_id.to_string(),
                total: 0,
                payment_status: None,
            }),
            None => Err(OrderError::NotFound(order_id.to_string())),
        }
    }

    async fn set_payment_status(
        &self,
        order_id: &str,
        status: SessionStatus,
    ) -> Result<(), OrderError> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(order_id) {
            Some(order) => order.payment_status = Some(status.as_str().to_string()),
            None if self.accept_unknown => {}
            None => return Err(OrderError::NotFound(order_id.to_string())),
        }
        self.status_writes
            .lock()
            .await
            .push((order_id.to_string(), status));
        Ok(())
    }
}
