pub mod session_reconciler;
pub mod webhook_retry;

pub use session_reconciler::{ReconcileReport, SessionReconciler};
pub use webhook_retry::WebhookRetryWorker;
