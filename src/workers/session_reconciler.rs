//! Settles PENDING sessions whose webhook never arrived.
//!
//! Each cycle asks the processor for the current state of sessions that have
//! been PENDING longer than the stale threshold and applies it through the
//! same forward-only transition path webhooks use. Sessions that never got a
//! processor id cannot be looked up; they are failed once they pass the
//! abandonment threshold.
//!
//! A second sweep re-pushes settled statuses whose order update failed after
//! the webhook was already acknowledged.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::database::payment_session_repository::{PaymentSession, SessionStatus};
use crate::error::AppResult;
use crate::payments::types::CheckoutOutcome;
use crate::services::checkout_session::{CheckoutSessionService, TransitionOutcome};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub settled: usize,
    pub abandoned: usize,
    /// Order pushes completed for already-settled sessions
    pub resynced: usize,
    pub errors: usize,
}

pub struct SessionReconciler {
    checkout: Arc<CheckoutSessionService>,
    config: ReconcilerConfig,
}

impl SessionReconciler {
    pub fn new(checkout: Arc<CheckoutSessionService>, config: ReconcilerConfig) -> Self {
        Self { checkout, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            stale_after_secs = self.config.stale_after_secs,
            abandon_after_secs = self.config.abandon_after_secs,
            "session reconciler started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("session reconciler stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report.checked > 0 || report.resynced > 0 => info!(
                            checked = report.checked,
                            settled = report.settled,
                            abandoned = report.abandoned,
                            resynced = report.resynced,
                            errors = report.errors,
                            "reconciliation cycle complete"
                        ),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "reconciliation cycle failed"),
                    }
                }
            }
        }

        info!("session reconciler stopped");
    }

    pub async fn run_cycle(&self) -> AppResult<ReconcileReport> {
        let now = Utc::now();
        let stale_before = now - ChronoDuration::seconds(self.config.stale_after_secs);
        let abandon_before = now - ChronoDuration::seconds(self.config.abandon_after_secs);

        let pending = self
            .checkout
            .stale_pending(stale_before, self.config.batch_size)
            .await?;

        let mut report = ReconcileReport::default();
        for session in pending {
            report.checked += 1;
            match self.reconcile(&session, abandon_before).await {
                Ok(Reconciled::Settled) => report.settled += 1,
                Ok(Reconciled::Abandoned) => report.abandoned += 1,
                Ok(Reconciled::Unchanged) => {}
                Err(e) => {
                    // One bad session must not stall the batch
                    warn!(session_id = %session.id, error = %e, "failed to reconcile session");
                    report.errors += 1;
                }
            }
        }

        let unsynced = self
            .checkout
            .unsynced_settled(self.config.batch_size)
            .await?;
        for session in unsynced {
            match self.checkout.resync_order(&session).await {
                Ok(true) => {
                    info!(session_id = %session.id, status = %session.status, "order status re-pushed");
                    report.resynced += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "order status push still failing");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    async fn reconcile(
        &self,
        session: &PaymentSession,
        abandon_before: chrono::DateTime<Utc>,
    ) -> AppResult<Reconciled> {
        let Some(processor_session_id) = &session.processor_session_id else {
            if session.created_at > abandon_before {
                return Ok(Reconciled::Unchanged);
            }
            warn!(session_id = %session.id, "session never reached the processor; failing it");
            return self.settle(session, SessionStatus::Failed, Reconciled::Abandoned).await;
        };

        let remote = self.checkout.fetch_remote(processor_session_id).await?;
        match remote.outcome() {
            CheckoutOutcome::Paid => self.settle(session, SessionStatus::Paid, Reconciled::Settled).await,
            CheckoutOutcome::Expired => {
                self.settle(session, SessionStatus::Failed, Reconciled::Settled).await
            }
            CheckoutOutcome::Open => {
                debug!(session_id = %session.id, "processor session still open");
                Ok(Reconciled::Unchanged)
            }
        }
    }

    async fn settle(
        &self,
        session: &PaymentSession,
        to: SessionStatus,
        counted_as: Reconciled,
    ) -> AppResult<Reconciled> {
        match self.checkout.apply_transition(session, to).await? {
            TransitionOutcome::Applied(updated) => {
                info!(session_id = %updated.id, status = %updated.status, "session reconciled");
                Ok(counted_as)
            }
            _ => Ok(Reconciled::Unchanged),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciled {
    Settled,
    Abandoned,
    Unchanged,
}
