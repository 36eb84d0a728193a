use crate::config::ProcessorConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProcessor;
use crate::payments::types::{
    AccountLink, AccountLinkKind, AccountProfile, CheckoutSessionRequest, PayeeKind,
    ProcessorAccount, ProcessorBalance, ProcessorCheckoutSession,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

/// Where the hosted onboarding flow sends the payee afterwards
#[derive(Debug, Clone)]
pub struct OnboardingUrls {
    pub return_url: String,
    pub refresh_url: String,
}

/// HTTP client for a connected-accounts processor API
pub struct ConnectProcessor {
    api_key: String,
    base_url: String,
    urls: OnboardingUrls,
    http: PaymentHttpClient,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl ConnectProcessor {
    pub fn new(config: &ProcessorConfig, urls: OnboardingUrls) -> PaymentResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "PROCESSOR_API_KEY is required".to_string(),
                field: Some("PROCESSOR_API_KEY".to_string()),
            });
        }
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            urls,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn account_search_url(&self, payee_id: &str) -> PaymentResult<reqwest::Url> {
        reqwest::Url::parse_with_params(
            &self.endpoint("/v1/accounts/search"),
            &[("payee_id", payee_id)],
        )
        .map_err(|e| PaymentError::ValidationError {
            message: format!("invalid account search url: {}", e),
            field: Some("PROCESSOR_BASE_URL".to_string()),
        })
    }
}

#[async_trait]
impl PaymentProcessor for ConnectProcessor {
    async fn find_account_by_payee(&self, payee_id: &str) -> PaymentResult<Option<ProcessorAccount>> {
        let url = self.account_search_url(payee_id)?;
        let found: ListEnvelope<ProcessorAccount> = self
            .http
            .request_json(reqwest::Method::GET, url.as_str(), Some(&self.api_key), None, &[])
            .await?;

        Ok(found
            .data
            .into_iter()
            .find(|account| account.metadata.get("payee_id").map(String::as_str) == Some(payee_id)))
    }

    async fn create_account(
        &self,
        payee_id: &str,
        profile: &AccountProfile,
    ) -> PaymentResult<ProcessorAccount> {
        let payload = serde_json::json!({
            "type": "express",
            "email": profile.email,
            "country": profile.country,
            "business_profile": { "name": profile.business_name },
            "capabilities": { "transfers": { "requested": true } },
            "metadata": {
                "payee_id": payee_id,
                "payee_kind": profile.kind.unwrap_or(PayeeKind::Business).as_str(),
            },
        });
        // One remote account per payee, even if the create is retried
        let idempotency_key = format!("account-create-{}", payee_id);

        let account: ProcessorAccount = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/accounts"),
                Some(&self.api_key),
                Some(&payload),
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await?;

        info!(payee_id = %payee_id, account_id = %account.id, "processor sub-account created");
        Ok(account)
    }

    async fn retrieve_account(&self, account_id: &str) -> PaymentResult<ProcessorAccount> {
        let url = self.endpoint(&format!("/v1/accounts/{}", account_id));
        self.http
            .request_json(reqwest::Method::GET, &url, Some(&self.api_key), None, &[])
            .await
    }

    async fn create_account_link(
        &self,
        account_id: &str,
        kind: AccountLinkKind,
    ) -> PaymentResult<AccountLink> {
        let payload = serde_json::json!({
            "account": account_id,
            "type": kind.as_str(),
            "refresh_url": self.urls.refresh_url,
            "return_url": self.urls.return_url,
        });
        self.http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/account_links"),
                Some(&self.api_key),
                Some(&payload),
                &[],
            )
            .await
    }

    async fn create_login_link(&self, account_id: &str) -> PaymentResult<AccountLink> {
        let url = self.endpoint(&format!("/v1/accounts/{}/login_links", account_id));
        self.http
            .request_json(
                reqwest::Method::POST,
                &url,
                Some(&self.api_key),
                Some(&serde_json::json!({})),
                &[],
            )
            .await
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> PaymentResult<ProcessorCheckoutSession> {
        let payload = serde_json::to_value(request).map_err(|e| PaymentError::ValidationError {
            message: format!("unserializable checkout request: {}", e),
            field: None,
        })?;

        self.http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/checkout/sessions"),
                Some(&self.api_key),
                Some(&payload),
                &[("Idempotency-Key", request.idempotency_key.as_str())],
            )
            .await
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> PaymentResult<ProcessorCheckoutSession> {
        let url = self.endpoint(&format!("/v1/checkout/sessions/{}", session_id));
        self.http
            .request_json_once(reqwest::Method::GET, &url, Some(&self.api_key))
            .await
    }

    async fn retrieve_balance(&self, account_id: &str) -> PaymentResult<ProcessorBalance> {
        self.http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint("/v1/balance"),
                Some(&self.api_key),
                None,
                &[("Processor-Account", account_id)],
            )
            .await
    }

    async fn health_check(&self) -> PaymentResult<()> {
        let _: ProcessorBalance = self
            .http
            .request_json_once(
                reqwest::Method::GET,
                &self.endpoint("/v1/balance"),
                Some(&self.api_key),
            )
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "connect"
    }
}
