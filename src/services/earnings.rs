//! Payee earnings summary
//!
//! Totals come from PAID sessions in the local store; payout figures come
//! from the live sub-account balance. Amounts stay in minor units until the
//! response is built and are converted to major units exactly once.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::database::repository::{PayeeAccountStore, PaymentSessionStore};
use crate::error::{AppError, AppResult, ValidationError};
use crate::payments::provider::PaymentProcessor;

/// ISO 4217 currencies without a minor unit
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

/// Minor units to major units for `currency`
pub fn to_major_units(minor: i64, currency: &str) -> Decimal {
    let scale = if ZERO_DECIMAL_CURRENCIES.contains(&currency.to_ascii_lowercase().as_str()) {
        0
    } else {
        2
    };
    Decimal::new(minor, scale)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EarningsSummary {
    pub gross_revenue: Decimal,
    pub platform_fees: Decimal,
    pub net_earnings: Decimal,
    pub pending_payout: Decimal,
    pub completed_payout: Decimal,
    pub transaction_count: i64,
    pub currency: String,
    /// False when the live balance could not be fetched; payout figures are zero
    pub balance_available: bool,
}

impl EarningsSummary {
    fn zero(currency: &str) -> Self {
        Self {
            gross_revenue: Decimal::ZERO,
            platform_fees: Decimal::ZERO,
            net_earnings: Decimal::ZERO,
            pending_payout: Decimal::ZERO,
            completed_payout: Decimal::ZERO,
            transaction_count: 0,
            currency: currency.to_string(),
            balance_available: true,
        }
    }
}

pub struct EarningsService {
    sessions: Arc<dyn PaymentSessionStore>,
    accounts: Arc<dyn PayeeAccountStore>,
    processor: Arc<dyn PaymentProcessor>,
    currency: String,
}

impl EarningsService {
    pub fn new(
        sessions: Arc<dyn PaymentSessionStore>,
        accounts: Arc<dyn PayeeAccountStore>,
        processor: Arc<dyn PaymentProcessor>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            accounts,
            processor,
            currency: currency.into(),
        }
    }

    pub async fn get_earnings(
        &self,
        payee_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<EarningsSummary> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(AppError::validation(ValidationError::InvalidField {
                    field: "from".to_string(),
                    reason: "must not be after 'to'".to_string(),
                }));
            }
        }

        let sub_account_id = match self.accounts.get(payee_id).await? {
            Some(account) => account.sub_account_id,
            None => None,
        };
        let Some(sub_account_id) = sub_account_id else {
            return Ok(EarningsSummary::zero(&self.currency));
        };

        let totals = self.sessions.earnings_totals(payee_id, from, to).await?;

        let (pending, available, balance_available) =
            match self.processor.retrieve_balance(&sub_account_id).await {
                Ok(balance) => (
                    balance.pending_in(&self.currency),
                    balance.available_in(&self.currency),
                    true,
                ),
                Err(e) => {
                    warn!(
                        payee_id = %payee_id,
                        sub_account_id = %sub_account_id,
                        error = %e,
                        "balance unavailable; reporting totals only"
                    );
                    (0, 0, false)
                }
            };

        let currency = self.currency.as_str();
        Ok(EarningsSummary {
            gross_revenue: to_major_units(totals.gross, currency),
            platform_fees: to_major_units(totals.platform_fees, currency),
            net_earnings: to_major_units(totals.net, currency),
            pending_payout: to_major_units(pending, currency),
            completed_payout: to_major_units(available, currency),
            transaction_count: totals.count,
            currency: self.currency.clone(),
            balance_available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn minor_units_convert_once() {
        assert_eq!(to_major_units(11100, "usd"), Decimal::from_str("111.00").unwrap());
        assert_eq!(to_major_units(5, "USD"), Decimal::from_str("0.05").unwrap());
        assert_eq!(to_major_units(500, "jpy"), Decimal::from(500));
    }
}
