//! Wire types exchanged with the payment processor

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata keys stamped on every checkout session we create
pub const META_IDEMPOTENCY_TOKEN: &str = "idempotency_token";
pub const META_ORDER_ID: &str = "order_id";
pub const META_PAYEE_ID: &str = "payee_id";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayeeKind {
    Business,
    Staff,
}

impl PayeeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayeeKind::Business => "BUSINESS",
            PayeeKind::Staff => "STAFF",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "BUSINESS" => Some(PayeeKind::Business),
            "STAFF" => Some(PayeeKind::Staff),
            _ => None,
        }
    }
}

/// Profile data forwarded when a sub-account is created
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountProfile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub kind: Option<PayeeKind>,
}

/// Processor view of a payee sub-account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorAccount {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub requirements: AccountRequirements,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountRequirements {
    #[serde(default)]
    pub currently_due: Vec<String>,
    #[serde(default)]
    pub disabled_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountLink {
    pub url: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountLinkKind {
    Onboarding,
    Update,
}

impl AccountLinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountLinkKind::Onboarding => "account_onboarding",
            AccountLinkKind::Update => "account_update",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub name: String,
    pub unit_amount: i64,
    pub quantity: i64,
}

/// Everything the processor needs to open a hosted checkout
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSessionRequest {
    pub line_items: Vec<LineItem>,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub client_reference_id: String,
    pub metadata: HashMap<String, String>,
    pub application_fee_amount: Option<i64>,
    pub transfer_destination: Option<String>,
    /// Sent as the processor's idempotency key header
    #[serde(skip)]
    pub idempotency_key: String,
}

/// Processor view of a checkout session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorCheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    /// open | complete | expired
    #[serde(default)]
    pub status: Option<String>,
    /// paid | unpaid | no_payment_required
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub application_fee_amount: Option<i64>,
    #[serde(default)]
    pub transfer_destination: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
}

/// Settlement outcome a processor session implies, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Open,
    Paid,
    Expired,
}

impl ProcessorCheckoutSession {
    pub fn outcome(&self) -> CheckoutOutcome {
        match (self.status.as_deref(), self.payment_status.as_deref()) {
            (_, Some("paid")) | (_, Some("no_payment_required")) => CheckoutOutcome::Paid,
            (Some("expired"), _) => CheckoutOutcome::Expired,
            _ => CheckoutOutcome::Open,
        }
    }

    pub fn idempotency_token(&self) -> Option<&str> {
        self.metadata
            .get(META_IDEMPOTENCY_TOKEN)
            .map(String::as_str)
            .or(self.client_reference_id.as_deref())
    }

    pub fn order_id(&self) -> Option<&str> {
        self.metadata.get(META_ORDER_ID).map(String::as_str)
    }

    pub fn payee_id(&self) -> Option<&str> {
        self.metadata.get(META_PAYEE_ID).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceAmount {
    pub amount: i64,
    pub currency: String,
}

/// Live balance of a connected sub-account
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorBalance {
    #[serde(default)]
    pub available: Vec<BalanceAmount>,
    #[serde(default)]
    pub pending: Vec<BalanceAmount>,
}

impl ProcessorBalance {
    pub fn available_in(&self, currency: &str) -> i64 {
        sum_currency(&self.available, currency)
    }

    pub fn pending_in(&self, currency: &str) -> i64 {
        sum_currency(&self.pending, currency)
    }
}

fn sum_currency(amounts: &[BalanceAmount], currency: &str) -> i64 {
    amounts
        .iter()
        .filter(|a| a.currency.eq_ignore_ascii_case(currency))
        .map(|a| a.amount)
        .sum()
}
