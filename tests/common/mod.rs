//! Shared fixtures: a scriptable processor, in-memory stores and signed events.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use settlement_backend::config::{
    AppConfig, DatabaseConfig, LogFormat, LoggingConfig, ProcessorConfig, ReconcilerConfig,
    ServerConfig, SettlementConfig, WebhookConfig,
};
use settlement_backend::database::payee_account_repository::AccountSnapshot;
use settlement_backend::database::Stores;
use settlement_backend::payments::error::{PaymentError, PaymentResult};
use settlement_backend::payments::provider::PaymentProcessor;
use settlement_backend::payments::types::{
    AccountLink, AccountLinkKind, AccountProfile, AccountRequirements, BalanceAmount,
    CheckoutSessionRequest, PayeeKind, ProcessorAccount, ProcessorBalance,
    ProcessorCheckoutSession,
};
use settlement_backend::payments::webhook::sign_payload;
use settlement_backend::services::notification::RecordingPublisher;
use settlement_backend::database::payment_session_repository::SessionStatus;
use settlement_backend::services::orders::{InMemoryOrderGateway, Order, OrderError, OrderGateway};
use settlement_backend::SettlementServices;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Processor double with counters and failure switches
#[derive(Default)]
pub struct FakeProcessor {
    accounts: Mutex<HashMap<String, ProcessorAccount>>,
    sessions: Mutex<HashMap<String, ProcessorCheckoutSession>>,
    pub checkout_requests: Mutex<Vec<CheckoutSessionRequest>>,
    balance: Mutex<ProcessorBalance>,
    next_id: AtomicUsize,
    pub create_account_calls: AtomicUsize,
    pub fail_checkout: AtomicBool,
    pub fail_balance: AtomicBool,
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}_{:04}", prefix, n)
    }

    /// An account that exists remotely but was never recorded locally
    pub fn seed_orphan_account(&self, payee_id: &str) -> String {
        let id = self.next("acct");
        let mut metadata = HashMap::new();
        metadata.insert("payee_id".to_string(), payee_id.to_string());
        self.accounts.lock().unwrap().insert(
            id.clone(),
            ProcessorAccount {
                id: id.clone(),
                charges_enabled: false,
                payouts_enabled: false,
                details_submitted: false,
                requirements: AccountRequirements::default(),
                metadata,
            },
        );
        id
    }

    pub fn set_account_flags(&self, account_id: &str, enabled: bool) {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(account_id) {
            account.charges_enabled = enabled;
            account.payouts_enabled = enabled;
            account.details_submitted = enabled;
        }
    }

    /// Register a session the processor knows about
    pub fn put_session(&self, session: ProcessorCheckoutSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn mark_session_paid(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.status = Some("complete".to_string());
            session.payment_status = Some("paid".to_string());
        }
    }

    pub fn session(&self, session_id: &str) -> Option<ProcessorCheckoutSession> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn set_balance(&self, available: i64, pending: i64) {
        *self.balance.lock().unwrap() = ProcessorBalance {
            available: vec![BalanceAmount {
                amount: available,
                currency: "usd".to_string(),
            }],
            pending: vec![BalanceAmount {
                amount: pending,
                currency: "usd".to_string(),
            }],
        };
    }

    pub fn account_count(&self) -> usize {
        self.accounts.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn find_account_by_payee(&self, payee_id: &str) -> PaymentResult<Option<ProcessorAccount>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.metadata.get("payee_id").map(String::as_str) == Some(payee_id))
            .cloned())
    }

    async fn create_account(
        &self,
        payee_id: &str,
        _profile: &AccountProfile,
    ) -> PaymentResult<ProcessorAccount> {
        self.create_account_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.seed_orphan_account(payee_id);
        Ok(self.accounts.lock().unwrap()[&id].clone())
    }

    async fn retrieve_account(&self, account_id: &str) -> PaymentResult<ProcessorAccount> {
        self.accounts
            .lock()
            .unwrap()
            .get(account_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound {
                resource: "account".to_string(),
                id: account_id.to_string(),
            })
    }

    async fn create_account_link(
        &self,
        account_id: &str,
        kind: AccountLinkKind,
    ) -> PaymentResult<AccountLink> {
        Ok(AccountLink {
            url: format!("https://connect.test/{}/{}", kind.as_str(), account_id),
            expires_at: Some(Utc::now().timestamp() + 300),
        })
    }

    async fn create_login_link(&self, account_id: &str) -> PaymentResult<AccountLink> {
        Ok(AccountLink {
            url: format!("https://connect.test/dashboard/{}", account_id),
            expires_at: None,
        })
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> PaymentResult<ProcessorCheckoutSession> {
        self.checkout_requests.lock().unwrap().push(request.clone());
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(PaymentError::NetworkError {
                message: "connection reset".to_string(),
            });
        }

        let id = self.next("cs_test");
        let session = ProcessorCheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.test/pay/{}", id)),
            status: Some("open".to_string()),
            payment_status: Some("unpaid".to_string()),
            amount_total: Some(request.line_items.iter().map(|i| i.unit_amount * i.quantity).sum()),
            currency: Some(request.currency.clone()),
            payment_intent: Some(self.next("pi")),
            client_reference_id: Some(request.client_reference_id.clone()),
            metadata: request.metadata.clone(),
            application_fee_amount: request.application_fee_amount,
            transfer_destination: request.transfer_destination.clone(),
            created: Some(Utc::now().timestamp()),
        };
        self.put_session(session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> PaymentResult<ProcessorCheckoutSession> {
        self.session(session_id).ok_or_else(|| PaymentError::NotFound {
            resource: "checkout session".to_string(),
            id: session_id.to_string(),
        })
    }

    async fn retrieve_balance(&self, _account_id: &str) -> PaymentResult<ProcessorBalance> {
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(PaymentError::Timeout { timeout_secs: 10 });
        }
        Ok(self.balance.lock().unwrap().clone())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Order gateway that can stall and fail status pushes in front of the
/// in-memory order book
pub struct ScriptedOrders {
    inner: Arc<InMemoryOrderGateway>,
    pub push_delay_ms: AtomicU64,
    pub fail_next_push: AtomicBool,
    pub push_attempts: AtomicUsize,
}

impl ScriptedOrders {
    pub fn new(inner: Arc<InMemoryOrderGateway>) -> Self {
        Self {
            inner,
            push_delay_ms: AtomicU64::new(0),
            fail_next_push: AtomicBool::new(false),
            push_attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OrderGateway for ScriptedOrders {
    async fn get_order(&self, order_id: &str) -> Result<Order, OrderError> {
        self.inner.get_order(order_id).await
    }

    async fn set_payment_status(
        &self,
        order_id: &str,
        status: SessionStatus,
    ) -> Result<(), OrderError> {
        self.push_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.push_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_next_push.swap(false, Ordering::SeqCst) {
            return Err(OrderError::Unavailable("order service restarting".to_string()));
        }
        self.inner.set_payment_status(order_id, status).await
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        environment: "test".to_string(),
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
            connection_timeout: 1,
            idle_timeout: None,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Plain,
        },
        processor: ProcessorConfig {
            api_key: "sk_test".to_string(),
            base_url: "http://processor.invalid".to_string(),
            timeout_secs: 2,
            max_retries: 0,
        },
        settlement: SettlementConfig {
            default_fee_percent: Decimal::new(50, 1),
            currency: "usd".to_string(),
            max_session_amount_minor: 99_999_999,
            checkout_success_url: "http://shop.test/success".to_string(),
            checkout_cancel_url: "http://shop.test/cancel".to_string(),
            onboarding_return_url: "http://shop.test/return".to_string(),
            onboarding_refresh_url: "http://shop.test/refresh".to_string(),
            proximity_fallback_enabled: true,
            proximity_window_secs: 300,
            order_service_url: None,
        },
        webhook: WebhookConfig {
            secret: WEBHOOK_SECRET.to_string(),
            tolerance_secs: 300,
            signature_bypass: false,
        },
        reconciler: ReconcilerConfig {
            stale_after_secs: 0,
            abandon_after_secs: 0,
            ..ReconcilerConfig::default()
        },
    }
}

pub struct Harness {
    pub services: SettlementServices,
    pub stores: Stores,
    pub processor: Arc<FakeProcessor>,
    pub orders: Arc<InMemoryOrderGateway>,
    pub order_faults: Arc<ScriptedOrders>,
    pub publisher: Arc<RecordingPublisher>,
    pub config: AppConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        settlement_backend::logging::init_tracing();
        let stores = Stores::in_memory();
        let processor = Arc::new(FakeProcessor::new());
        let orders = Arc::new(InMemoryOrderGateway::new());
        let order_faults = Arc::new(ScriptedOrders::new(orders.clone()));
        let publisher = Arc::new(RecordingPublisher::new());
        let services = SettlementServices::new(
            &config,
            stores.clone(),
            processor.clone(),
            order_faults.clone(),
            publisher.clone(),
            None,
        );
        Self {
            services,
            stores,
            processor,
            orders,
            order_faults,
            publisher,
            config,
        }
    }

    pub fn router(&self) -> axum::Router {
        settlement_backend::api::router(self.services.clone())
    }

    /// An unpaid order known to the order subsystem
    pub async fn add_order(&self, order_id: &str, total: i64) {
        self.orders
            .insert(Order {
                id: order_id.to_string(),
                total,
                payment_status: None,
            })
            .await;
    }

    /// A payee with a fully enabled sub-account, recorded locally and remotely
    pub async fn active_payee(&self, payee_id: &str) -> String {
        let sub_account_id = self.processor.seed_orphan_account(payee_id);
        self.processor.set_account_flags(&sub_account_id, true);
        let snapshot = AccountSnapshot {
            sub_account_id: sub_account_id.clone(),
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
            requirements: Vec::new(),
            disabled_reason: None,
            observed_at: Utc::now(),
        };
        self.stores
            .accounts
            .upsert_onboarding(payee_id, PayeeKind::Business, &snapshot)
            .await
            .unwrap();
        sub_account_id
    }
}

pub fn line_items() -> JsonValue {
    json!([
        { "name": "Burger", "unitAmount": 1800, "quantity": 3 },
        { "name": "Fries", "unitAmount": 2200, "quantity": 2 },
        { "name": "Salad", "unitAmount": 1300, "quantity": 1 },
        { "name": "Lemonade", "unitAmount": 1000, "quantity": 1 }
    ])
}

/// Event envelope as the processor sends it
pub fn event(id: &str, event_type: &str, object: JsonValue) -> Vec<u8> {
    event_at(id, event_type, object, Utc::now().timestamp())
}

pub fn event_at(id: &str, event_type: &str, object: JsonValue, created: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": id,
        "type": event_type,
        "created": created,
        "data": { "object": object }
    }))
    .unwrap()
}

pub fn sign(body: &[u8]) -> String {
    sign_payload(body, WEBHOOK_SECRET, Utc::now().timestamp())
}

pub fn completed_session_object(session: &ProcessorCheckoutSession) -> JsonValue {
    let mut object = serde_json::to_value(session).unwrap();
    object["status"] = json!("complete");
    object["payment_status"] = json!("paid");
    object
}
