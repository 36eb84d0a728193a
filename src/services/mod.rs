//! Services module for settlement business logic

pub mod account_onboarding;
pub mod checkout_session;
pub mod earnings;
pub mod fee_calculation;
pub mod notification;
pub mod orders;
pub mod webhook_processor;

pub use account_onboarding::AccountOnboardingService;
pub use checkout_session::{CheckoutSessionService, CheckoutSettings, TransitionOutcome};
pub use earnings::EarningsService;
pub use notification::NotificationService;
pub use webhook_processor::WebhookProcessor;
