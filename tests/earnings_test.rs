mod common;

use chrono::{Duration, Utc};
use common::{line_items, Harness};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::atomic::Ordering;

use settlement_backend::database::payment_session_repository::SessionStatus;
use settlement_backend::error::ErrorCode;
use settlement_backend::payments::types::ProcessorCheckoutSession;
use settlement_backend::services::checkout_session::CreateSessionRequest;
use settlement_backend::services::fee_calculation::FeeSplit;

/// Two PAID sessions and one still PENDING for `payee_id`
async fn seed_sales(h: &Harness, payee_id: &str) {
    h.active_payee(payee_id).await;
    for paid in [true, true, false] {
        let request: CreateSessionRequest =
            serde_json::from_value(json!({ "payeeId": payee_id, "lineItems": line_items() }))
                .unwrap();
        let created = h.services.checkout.create_session(request).await.unwrap();
        if paid {
            let session = h
                .stores
                .sessions
                .get(created.payment_id)
                .await
                .unwrap()
                .unwrap();
            h.services
                .checkout
                .apply_transition(&session, SessionStatus::Paid)
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn test_earnings_sum_paid_sessions_in_major_units() {
    let h = Harness::new();
    seed_sales(&h, "biz_1").await;
    h.processor.set_balance(2000, 500);

    let summary = h
        .services
        .earnings
        .get_earnings("biz_1", None, None)
        .await
        .unwrap();

    assert_eq!(summary.transaction_count, 2);
    assert_eq!(summary.gross_revenue, Decimal::new(22200, 2));
    assert_eq!(summary.platform_fees, Decimal::new(1110, 2));
    assert_eq!(summary.net_earnings, Decimal::new(21090, 2));
    assert_eq!(summary.completed_payout, Decimal::new(2000, 2));
    assert_eq!(summary.pending_payout, Decimal::new(500, 2));
    assert_eq!(summary.currency, "usd");
    assert!(summary.balance_available);
}

#[tokio::test]
async fn test_payee_without_sub_account_gets_zeros() {
    let h = Harness::new();

    let summary = h
        .services
        .earnings
        .get_earnings("staff_new", None, None)
        .await
        .unwrap();

    assert_eq!(summary.transaction_count, 0);
    assert_eq!(summary.gross_revenue, Decimal::ZERO);
    assert_eq!(summary.pending_payout, Decimal::ZERO);
}

#[tokio::test]
async fn test_date_range_filters_sessions() {
    let h = Harness::new();
    seed_sales(&h, "biz_1").await;

    let tomorrow = Utc::now() + Duration::days(1);
    let summary = h
        .services
        .earnings
        .get_earnings("biz_1", Some(tomorrow), None)
        .await
        .unwrap();
    assert_eq!(summary.transaction_count, 0);

    let yesterday = Utc::now() - Duration::days(1);
    let summary = h
        .services
        .earnings
        .get_earnings("biz_1", Some(yesterday), Some(tomorrow))
        .await
        .unwrap();
    assert_eq!(summary.transaction_count, 2);

    let err = h
        .services
        .earnings
        .get_earnings("biz_1", Some(tomorrow), Some(yesterday))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn test_balance_outage_still_reports_totals() {
    let h = Harness::new();
    seed_sales(&h, "biz_1").await;
    h.processor.fail_balance.store(true, Ordering::SeqCst);

    let summary = h
        .services
        .earnings
        .get_earnings("biz_1", None, None)
        .await
        .unwrap();

    assert!(!summary.balance_available);
    assert_eq!(summary.transaction_count, 2);
    assert_eq!(summary.completed_payout, Decimal::ZERO);
}

fn paid_remote_session(id: &str, gross: i64, payee_id: &str, fee: Option<i64>) -> ProcessorCheckoutSession {
    ProcessorCheckoutSession {
        id: id.to_string(),
        url: None,
        status: Some("complete".to_string()),
        payment_status: Some("paid".to_string()),
        amount_total: Some(gross),
        currency: Some("usd".to_string()),
        payment_intent: None,
        client_reference_id: None,
        metadata: [("payee_id".to_string(), payee_id.to_string())]
            .into_iter()
            .collect(),
        application_fee_amount: fee,
        transfer_destination: None,
        created: Some(Utc::now().timestamp()),
    }
}

#[tokio::test]
async fn test_recovered_payee_sessions_always_carry_a_split() {
    let h = Harness::new();
    h.active_payee("biz_1").await;
    h.processor.put_session(paid_remote_session("cs_test_lost", 4998, "biz_1", None));
    h.processor.put_session(paid_remote_session("cs_test_fee", 10000, "biz_1", Some(500)));

    let lost = h
        .services
        .checkout
        .resolve_status(Some("cs_test_lost"), None)
        .await
        .unwrap();
    assert_eq!(lost.status, SessionStatus::Paid);
    // No application fee was collected, so the payee kept the gross
    assert_eq!(
        lost.split(),
        Some(FeeSplit {
            platform_fee: 0,
            net_amount: 4998
        })
    );

    let with_fee = h
        .services
        .checkout
        .resolve_status(Some("cs_test_fee"), None)
        .await
        .unwrap();
    assert_eq!(
        with_fee.split(),
        Some(FeeSplit {
            platform_fee: 500,
            net_amount: 9500
        })
    );

    let summary = h
        .services
        .earnings
        .get_earnings("biz_1", None, None)
        .await
        .unwrap();
    assert_eq!(summary.transaction_count, 2);
    assert_eq!(summary.gross_revenue, Decimal::new(14998, 2));
    assert_eq!(summary.platform_fees, Decimal::new(500, 2));
    assert_eq!(summary.net_earnings, Decimal::new(14498, 2));
    assert_eq!(summary.gross_revenue, summary.platform_fees + summary.net_earnings);
}
