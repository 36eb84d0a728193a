//! Payment settlement backend
//!
//! Connected-account onboarding, checkout sessions with platform fee splits,
//! signed webhook reconciliation and payee earnings, served over axum.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::database::Stores;
use crate::health::HealthChecker;
use crate::payments::provider::PaymentProcessor;
use crate::payments::webhook::WebhookVerifier;
use crate::services::checkout_session::{CheckoutSessionService, CheckoutSettings};
use crate::services::notification::{EventPublisher, NotificationService};
use crate::services::orders::OrderGateway;
use crate::services::{AccountOnboardingService, EarningsService, WebhookProcessor};

/// Every service the HTTP layer and the workers need, built once at startup
#[derive(Clone)]
pub struct SettlementServices {
    pub onboarding: Arc<AccountOnboardingService>,
    pub checkout: Arc<CheckoutSessionService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub earnings: Arc<EarningsService>,
    pub health: HealthChecker,
}

impl SettlementServices {
    pub fn new(
        config: &AppConfig,
        stores: Stores,
        processor: Arc<dyn PaymentProcessor>,
        orders: Arc<dyn OrderGateway>,
        publisher: Arc<dyn EventPublisher>,
        db_pool: Option<sqlx::PgPool>,
    ) -> Self {
        let settings = CheckoutSettings::from_config(
            &config.settlement,
            Duration::from_secs(config.processor.timeout_secs),
        );
        let checkout = Arc::new(CheckoutSessionService::new(
            stores.sessions.clone(),
            stores.accounts.clone(),
            processor.clone(),
            orders,
            NotificationService::new(publisher),
            settings,
        ));

        let verifier = WebhookVerifier::new(config.webhook.secret.clone(), config.webhook.tolerance_secs)
            .with_bypass(config.webhook.signature_bypass);
        let webhooks = Arc::new(WebhookProcessor::new(
            stores.events.clone(),
            checkout.clone(),
            stores.accounts.clone(),
            verifier,
        ));

        Self {
            onboarding: Arc::new(AccountOnboardingService::new(
                stores.accounts.clone(),
                processor.clone(),
            )),
            earnings: Arc::new(EarningsService::new(
                stores.sessions.clone(),
                stores.accounts.clone(),
                processor.clone(),
                config.settlement.currency.clone(),
            )),
            health: HealthChecker::new(db_pool, processor),
            checkout,
            webhooks,
        }
    }
}
