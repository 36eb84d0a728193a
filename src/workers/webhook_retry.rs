use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::services::webhook_processor::WebhookProcessor;

const BATCH_SIZE: i64 = 50;

/// Re-applies ledger entries whose first apply failed
pub struct WebhookRetryWorker {
    processor: Arc<WebhookProcessor>,
    interval: Duration,
    max_retries: i32,
}

impl WebhookRetryWorker {
    pub fn new(processor: Arc<WebhookProcessor>, interval_secs: u64, max_retries: i32) -> Self {
        Self {
            processor,
            interval: Duration::from_secs(interval_secs),
            max_retries,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_retries = self.max_retries,
            "Webhook retry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Webhook retry worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.run_cycle().await;
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> usize {
        match self.processor.retry_pending(BATCH_SIZE, self.max_retries).await {
            Ok(count) => {
                if count > 0 {
                    info!(processed = count, "Retried pending webhooks");
                }
                count
            }
            Err(e) => {
                error!(error = %e, "Failed to retry pending webhooks");
                0
            }
        }
    }
}
