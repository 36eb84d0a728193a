mod common;

use common::Harness;
use rust_decimal::Decimal;
use std::sync::atomic::Ordering;

use settlement_backend::database::payee_account_repository::AccountStatus;
use settlement_backend::error::ErrorCode;
use settlement_backend::payments::types::{AccountProfile, PayeeKind};
use settlement_backend::services::fee_calculation::FeePolicy;

fn staff_profile() -> AccountProfile {
    AccountProfile {
        email: Some("courier@example.com".to_string()),
        business_name: None,
        country: Some("US".to_string()),
        kind: Some(PayeeKind::Staff),
    }
}

#[tokio::test]
async fn test_begin_onboarding_creates_account_and_link() {
    let h = Harness::new();

    let result = h
        .services
        .onboarding
        .begin_onboarding("staff_1", &staff_profile(), false)
        .await
        .unwrap();

    assert!(result.sub_account_id.starts_with("acct_"));
    assert!(result.onboarding_url.contains("account_onboarding"));
    assert_eq!(result.status, AccountStatus::Pending);
    assert_eq!(h.processor.create_account_calls.load(Ordering::SeqCst), 1);

    let stored = h.stores.accounts.get("staff_1").await.unwrap().unwrap();
    assert_eq!(stored.kind, PayeeKind::Staff);
    assert_eq!(stored.sub_account_id.as_deref(), Some(result.sub_account_id.as_str()));
}

#[tokio::test]
async fn test_second_onboarding_is_rejected_unless_refreshing() {
    let h = Harness::new();
    let first = h
        .services
        .onboarding
        .begin_onboarding("biz_1", &AccountProfile::default(), false)
        .await
        .unwrap();

    let err = h
        .services
        .onboarding
        .begin_onboarding("biz_1", &AccountProfile::default(), false)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::AlreadyOnboarded);
    assert_eq!(err.status_code(), 409);

    let refreshed = h
        .services
        .onboarding
        .begin_onboarding("biz_1", &AccountProfile::default(), true)
        .await
        .unwrap();
    assert_eq!(refreshed.sub_account_id, first.sub_account_id);
    assert_eq!(h.processor.create_account_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_orphaned_remote_account_is_adopted() {
    let h = Harness::new();
    // Created remotely on an earlier attempt whose local write was lost
    let orphan = h.processor.seed_orphan_account("biz_2");

    let result = h
        .services
        .onboarding
        .begin_onboarding("biz_2", &AccountProfile::default(), false)
        .await
        .unwrap();

    assert_eq!(result.sub_account_id, orphan);
    assert_eq!(h.processor.create_account_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.processor.account_count(), 1);
}

#[tokio::test]
async fn test_check_status_refreshes_from_processor() {
    let h = Harness::new();

    let view = h.services.onboarding.check_status("nobody").await.unwrap();
    assert_eq!(view.status, AccountStatus::NotConnected);
    assert!(view.needs_onboarding);

    let result = h
        .services
        .onboarding
        .begin_onboarding("biz_1", &AccountProfile::default(), false)
        .await
        .unwrap();
    h.processor.set_account_flags(&result.sub_account_id, true);

    let view = h.services.onboarding.check_status("biz_1").await.unwrap();
    assert_eq!(view.status, AccountStatus::Active);
    assert!(!view.needs_onboarding);
    assert!(view.last_status_check.is_some());

    let stored = h.stores.accounts.get("biz_1").await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Active);
}

#[tokio::test]
async fn test_links_require_a_sub_account() {
    let h = Harness::new();

    let err = h
        .services
        .onboarding
        .refresh_onboarding_link("biz_x")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::NotOnboarded);

    let err = h
        .services
        .onboarding
        .create_dashboard_link("biz_x")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::NotOnboarded);

    h.active_payee("biz_x").await;
    let refreshed = h
        .services
        .onboarding
        .refresh_onboarding_link("biz_x")
        .await
        .unwrap();
    // Details already submitted: the link updates rather than onboards
    assert!(refreshed.onboarding_url.contains("account_update"));

    let dashboard = h
        .services
        .onboarding
        .create_dashboard_link("biz_x")
        .await
        .unwrap();
    assert!(dashboard.contains("dashboard"));
}

#[tokio::test]
async fn test_fee_policy_is_validated_and_cleared() {
    let h = Harness::new();
    h.active_payee("biz_1").await;

    let err = h
        .services
        .onboarding
        .set_fee_policy("biz_1", Some(FeePolicy::Percentage(Decimal::new(150, 0))))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InvalidFeePercentage);

    let account = h
        .services
        .onboarding
        .set_fee_policy("biz_1", Some(FeePolicy::Percentage(Decimal::new(25, 1))))
        .await
        .unwrap();
    assert_eq!(account.fee_policy, Some(FeePolicy::Percentage(Decimal::new(25, 1))));

    let account = h.services.onboarding.set_fee_policy("biz_1", None).await.unwrap();
    assert_eq!(account.fee_policy, None);

    let err = h
        .services
        .onboarding
        .set_fee_policy("biz_unknown", None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::NotOnboarded);
}
