//! Platform fee math
//!
//! The only place a gross amount is split into platform fee and payee net.
//! Amounts are integer minor units; percentages are exact decimals. The fee is
//! rounded half-up (midpoint away from zero) on the exact rational product
//! `gross * percent / 100`, and the net is always `gross - fee`, so
//! `fee + net == gross` holds for every accepted input.

use crate::error::{AppError, ValidationError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: i64, reason: String },

    #[error("invalid fee percentage: {value}")]
    InvalidFeePercentage { value: String },
}

impl From<FeeError> for AppError {
    fn from(err: FeeError) -> Self {
        match err {
            FeeError::InvalidAmount { amount, reason } => {
                AppError::validation(ValidationError::InvalidAmount {
                    amount: amount.to_string(),
                    reason,
                })
            }
            FeeError::InvalidFeePercentage { value } => {
                AppError::validation(ValidationError::InvalidFeePercentage { value })
            }
        }
    }
}

/// Result of splitting a gross amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSplit {
    pub platform_fee: i64,
    pub net_amount: i64,
}

impl FeeSplit {
    pub fn gross(&self) -> i64 {
        self.platform_fee + self.net_amount
    }
}

/// How the platform fee is derived for a payee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeePolicy {
    /// Percentage of gross, 0..=100
    Percentage(Decimal),
    /// Fixed fee in minor units, must not exceed gross
    Fixed(i64),
}

impl FeePolicy {
    pub fn kind_str(&self) -> &'static str {
        match self {
            FeePolicy::Percentage(_) => "PERCENTAGE",
            FeePolicy::Fixed(_) => "FIXED",
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            FeePolicy::Percentage(pct) => *pct,
            FeePolicy::Fixed(minor) => Decimal::from(*minor),
        }
    }

    /// Rebuild a policy from its stored `(kind, value)` columns
    pub fn from_parts(kind: &str, value: Decimal) -> Option<Self> {
        match kind {
            "PERCENTAGE" => Some(FeePolicy::Percentage(value)),
            "FIXED" => value.to_i64().map(FeePolicy::Fixed),
            _ => None,
        }
    }

    /// Check the policy is well-formed independent of any gross amount
    pub fn validate(&self) -> Result<(), FeeError> {
        match self {
            FeePolicy::Percentage(pct) => validate_percentage(*pct),
            FeePolicy::Fixed(minor) if *minor < 0 => Err(FeeError::InvalidFeePercentage {
                value: minor.to_string(),
            }),
            FeePolicy::Fixed(_) => Ok(()),
        }
    }

    pub fn apply(&self, gross: i64) -> Result<FeeSplit, FeeError> {
        match self {
            FeePolicy::Percentage(pct) => compute_split(gross, *pct),
            FeePolicy::Fixed(fee) => split_fixed(gross, *fee),
        }
    }
}

fn validate_percentage(pct: Decimal) -> Result<(), FeeError> {
    if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
        return Err(FeeError::InvalidFeePercentage {
            value: pct.to_string(),
        });
    }
    Ok(())
}

fn validate_gross(gross: i64) -> Result<(), FeeError> {
    if gross <= 0 {
        return Err(FeeError::InvalidAmount {
            amount: gross,
            reason: "gross amount must be at least one minor unit".to_string(),
        });
    }
    Ok(())
}

/// Split `gross` minor units with a percentage fee.
pub fn compute_split(gross: i64, fee_percentage: Decimal) -> Result<FeeSplit, FeeError> {
    validate_gross(gross)?;
    validate_percentage(fee_percentage)?;

    let exact = Decimal::from(gross)
        .checked_mul(fee_percentage)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .ok_or_else(|| FeeError::InvalidAmount {
            amount: gross,
            reason: "amount too large for fee computation".to_string(),
        })?;

    let platform_fee = exact
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| FeeError::InvalidAmount {
            amount: gross,
            reason: "fee does not fit in minor units".to_string(),
        })?;

    // 0 <= pct <= 100 keeps the rounded fee within [0, gross]
    Ok(FeeSplit {
        platform_fee,
        net_amount: gross - platform_fee,
    })
}

fn split_fixed(gross: i64, fee: i64) -> Result<FeeSplit, FeeError> {
    validate_gross(gross)?;
    if fee < 0 || fee > gross {
        return Err(FeeError::InvalidFeePercentage {
            value: fee.to_string(),
        });
    }
    Ok(FeeSplit {
        platform_fee: fee,
        net_amount: gross - fee,
    })
}
