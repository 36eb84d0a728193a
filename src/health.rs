//! Health check module
//! Reports the status of the store and the payment processor

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::payments::provider::PaymentProcessor;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application.
///
/// The store is critical: when it is down the service reports Unhealthy. The
/// processor is not: sessions can still be looked up and webhooks still
/// arrive, so a failing processor only degrades the service.
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: Option<sqlx::PgPool>,
    processor: Arc<dyn PaymentProcessor>,
}

impl HealthChecker {
    /// `db_pool` is `None` when running on in-memory stores
    pub fn new(db_pool: Option<sqlx::PgPool>, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { db_pool, processor }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let database = async {
            match &self.db_pool {
                Some(pool) => {
                    probe("database", Duration::from_secs(5), check_database_health(pool)).await
                }
                None => ComponentHealth {
                    status: ComponentState::Up,
                    response_time_ms: None,
                    details: Some("in-memory store".to_string()),
                },
            }
        };
        let processor = probe(
            self.processor.name(),
            Duration::from_secs(10),
            check_processor_health(self.processor.as_ref()),
        );
        let (database, processor) = futures::join!(database, processor);

        // Processor trouble degrades but never fails the service
        let processor = match processor {
            ComponentHealth {
                status: ComponentState::Down,
                details,
                ..
            } => ComponentHealth::warning(None, details),
            healthy => healthy,
        };

        health_status.status = if database.status == ComponentState::Down {
            HealthState::Unhealthy
        } else if processor.status != ComponentState::Up {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status.checks.insert("database".to_string(), database);
        health_status.checks.insert("processor".to_string(), processor);
        health_status
    }
}

async fn probe<F>(name: &str, limit: Duration, check: F) -> ComponentHealth
where
    F: Future<Output = Result<u128, String>>,
{
    match timeout(limit, check).await {
        Ok(Ok(response_time)) => {
            info!("{} health check: OK ({}ms)", name, response_time);
            ComponentHealth::up(Some(response_time))
        }
        Ok(Err(e)) => {
            error!("{} health check failed: {}", name, e);
            ComponentHealth::down(Some(e))
        }
        Err(_) => {
            warn!("{} health check timed out", name);
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

pub async fn check_database_health(pool: &sqlx::PgPool) -> Result<u128, String> {
    let start = Instant::now();
    crate::database::health_check(pool)
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| e.to_string())
}

pub async fn check_processor_health(processor: &dyn PaymentProcessor) -> Result<u128, String> {
    let start = Instant::now();
    processor
        .health_check()
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.details, Some("Slow response".to_string()));
    }

    #[tokio::test]
    async fn probe_reports_timeouts_as_down() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<u128, String>(0)
        };
        let health = probe("slow", Duration::from_millis(5), slow).await;
        assert_eq!(health.status, ComponentState::Down);
        assert_eq!(health.details.as_deref(), Some("Timeout"));
    }
}
