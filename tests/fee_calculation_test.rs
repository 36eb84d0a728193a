use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;

use settlement_backend::error::{AppError, ErrorCode};
use settlement_backend::services::fee_calculation::{compute_split, FeePolicy};

#[test]
fn test_documented_split() {
    // $49.98 order at 5%: $2.50 to the platform, $47.48 to the business
    let split = compute_split(4998, Decimal::from_str("5.0").unwrap()).unwrap();
    assert_eq!(split.platform_fee, 250);
    assert_eq!(split.net_amount, 4748);
}

#[test]
fn test_fee_policy_wire_format() {
    let percentage: FeePolicy =
        serde_json::from_value(json!({ "kind": "PERCENTAGE", "value": "7.5" })).unwrap();
    assert_eq!(percentage, FeePolicy::Percentage(Decimal::new(75, 1)));

    let fixed: FeePolicy = serde_json::from_value(json!({ "kind": "FIXED", "value": 300 })).unwrap();
    assert_eq!(fixed, FeePolicy::Fixed(300));
    assert_eq!(
        serde_json::to_value(fixed).unwrap(),
        json!({ "kind": "FIXED", "value": 300 })
    );

    assert!(serde_json::from_value::<FeePolicy>(json!({ "kind": "TIERED", "value": 1 })).is_err());
}

#[test]
fn test_fee_errors_map_to_client_errors() {
    let err: AppError = compute_split(0, Decimal::ONE).unwrap_err().into();
    assert_eq!(err.error_code(), ErrorCode::InvalidAmount);
    assert_eq!(err.status_code(), 400);

    let err: AppError = compute_split(100, Decimal::new(101, 0)).unwrap_err().into();
    assert_eq!(err.error_code(), ErrorCode::InvalidFeePercentage);
    assert!(!err.is_retryable());
}
