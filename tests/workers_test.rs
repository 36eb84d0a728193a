mod common;

use common::{event, line_items, sign, Harness};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;

use settlement_backend::database::payment_session_repository::SessionStatus;
use settlement_backend::services::checkout_session::CreateSessionRequest;
use settlement_backend::workers::{SessionReconciler, WebhookRetryWorker};

fn request(order_id: &str) -> CreateSessionRequest {
    serde_json::from_value(json!({ "orderId": order_id, "lineItems": line_items() })).unwrap()
}

#[tokio::test]
async fn test_reconciler_settles_missed_webhooks() {
    let h = Harness::new();
    for order in ["order_paid", "order_open", "order_lost"] {
        h.add_order(order, 11100).await;
    }

    let paid = h.services.checkout.create_session(request("order_paid")).await.unwrap();
    let open = h.services.checkout.create_session(request("order_open")).await.unwrap();
    h.processor.fail_checkout.store(true, Ordering::SeqCst);
    h.services
        .checkout
        .create_session(request("order_lost"))
        .await
        .unwrap_err();

    // The processor saw the payment but the webhook never arrived
    h.processor.mark_session_paid(&paid.session_id);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let reconciler = SessionReconciler::new(h.services.checkout.clone(), h.config.reconciler.clone());
    let report = reconciler.run_cycle().await.unwrap();

    assert_eq!(report.checked, 3);
    assert_eq!(report.settled, 1);
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.errors, 0);

    let sessions = &h.stores.sessions;
    let paid_row = sessions.get(paid.payment_id).await.unwrap().unwrap();
    let open_row = sessions.get(open.payment_id).await.unwrap().unwrap();
    assert_eq!(paid_row.status, SessionStatus::Paid);
    assert_eq!(open_row.status, SessionStatus::Pending);

    let mut writes = h.orders.status_writes().await;
    writes.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        writes,
        vec![
            ("order_lost".to_string(), SessionStatus::Failed),
            ("order_paid".to_string(), SessionStatus::Paid),
        ]
    );

    // Settled rows drop out of the next cycle
    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.checked, 1);
}

#[tokio::test]
async fn test_retry_worker_cycle_reapplies_failed_events() {
    let h = Harness::new();
    let body = event(
        "evt_worker",
        "checkout.session.completed",
        json!({
            "id": "cs_test_worker",
            "status": "complete",
            "payment_status": "paid",
            "amount_total": 900,
            "metadata": { "order_id": "order_w" }
        }),
    );
    h.services
        .webhooks
        .process_webhook(&body, Some(&sign(&body)))
        .await
        .unwrap_err();

    let worker = WebhookRetryWorker::new(h.services.webhooks.clone(), 1, 5);
    assert_eq!(worker.run_cycle().await, 0);

    h.add_order("order_w", 900).await;
    assert_eq!(worker.run_cycle().await, 1);
    assert_eq!(
        h.orders.status_writes().await,
        vec![("order_w".to_string(), SessionStatus::Paid)]
    );
}

#[tokio::test]
async fn test_workers_stop_on_shutdown_signal() {
    let h = Harness::new();
    let (tx, rx) = watch::channel(false);

    let retry = tokio::spawn(WebhookRetryWorker::new(h.services.webhooks.clone(), 3600, 5).run(rx.clone()));
    let reconciler = tokio::spawn(
        SessionReconciler::new(h.services.checkout.clone(), h.config.reconciler.clone()).run(rx),
    );

    tx.send(true).unwrap();
    for handle in [retry, reconciler] {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
