//! Payee sub-account onboarding and status tracking
//!
//! Account creation spans two remote calls and one local write. If the local
//! write is lost, the remote account is found again by payee id on the next
//! attempt (check-before-create) instead of being created twice.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::payee_account_repository::{AccountSnapshot, AccountStatus, PayeeAccount};
use crate::database::repository::PayeeAccountStore;
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::provider::PaymentProcessor;
use crate::payments::types::{AccountLinkKind, AccountProfile, PayeeKind};
use crate::services::fee_calculation::FeePolicy;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingResult {
    pub sub_account_id: String,
    pub onboarding_url: String,
    pub expires_at: Option<i64>,
    pub status: AccountStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatusView {
    pub payee_id: String,
    pub status: AccountStatus,
    pub needs_onboarding: bool,
    pub sub_account_id: Option<String>,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub requirements: Vec<String>,
    pub disabled_reason: Option<String>,
    pub last_status_check: Option<DateTime<Utc>>,
}

impl AccountStatusView {
    pub fn not_connected(payee_id: &str) -> Self {
        Self {
            payee_id: payee_id.to_string(),
            status: AccountStatus::NotConnected,
            needs_onboarding: true,
            sub_account_id: None,
            charges_enabled: false,
            payouts_enabled: false,
            details_submitted: false,
            requirements: Vec::new(),
            disabled_reason: None,
            last_status_check: None,
        }
    }
}

impl From<&PayeeAccount> for AccountStatusView {
    fn from(account: &PayeeAccount) -> Self {
        Self {
            payee_id: account.payee_id.clone(),
            status: account.status,
            needs_onboarding: account.status != AccountStatus::Active,
            sub_account_id: account.sub_account_id.clone(),
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            details_submitted: account.details_submitted,
            requirements: account.requirements.clone(),
            disabled_reason: account.disabled_reason.clone(),
            last_status_check: account.last_status_check,
        }
    }
}

pub struct AccountOnboardingService {
    accounts: Arc<dyn PayeeAccountStore>,
    processor: Arc<dyn PaymentProcessor>,
}

impl AccountOnboardingService {
    pub fn new(accounts: Arc<dyn PayeeAccountStore>, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self {
            accounts,
            processor,
        }
    }

    /// Create (or adopt) the payee's sub-account and return a fresh onboarding link.
    ///
    /// Fails with `AlreadyOnboarded` when a sub-account is already recorded
    /// unless `refresh` is set, in which case only a new link is issued.
    pub async fn begin_onboarding(
        &self,
        payee_id: &str,
        profile: &AccountProfile,
        refresh: bool,
    ) -> AppResult<OnboardingResult> {
        let existing = self.accounts.get(payee_id).await?;

        if let Some(account) = &existing {
            if let Some(sub_account_id) = &account.sub_account_id {
                if !refresh {
                    return Err(AppError::domain(DomainError::AlreadyOnboarded {
                        payee_id: payee_id.to_string(),
                    }));
                }
                let link = self
                    .processor
                    .create_account_link(sub_account_id, AccountLinkKind::Onboarding)
                    .await?;
                return Ok(OnboardingResult {
                    sub_account_id: sub_account_id.clone(),
                    onboarding_url: link.url,
                    expires_at: link.expires_at,
                    status: account.status,
                });
            }
        }

        let remote = match self.processor.find_account_by_payee(payee_id).await? {
            Some(orphan) => {
                warn!(
                    payee_id = %payee_id,
                    sub_account_id = %orphan.id,
                    "adopting sub-account that exists at processor but not locally"
                );
                orphan
            }
            None => self.processor.create_account(payee_id, profile).await?,
        };

        let link = self
            .processor
            .create_account_link(&remote.id, AccountLinkKind::Onboarding)
            .await?;

        let kind = profile
            .kind
            .or(existing.as_ref().map(|a| a.kind))
            .unwrap_or(PayeeKind::Business);
        let snapshot = AccountSnapshot::from_processor(&remote, Utc::now());
        let account = self
            .accounts
            .upsert_onboarding(payee_id, kind, &snapshot)
            .await?;

        info!(
            payee_id = %payee_id,
            sub_account_id = %remote.id,
            status = %account.status,
            "payee onboarding started"
        );

        Ok(OnboardingResult {
            sub_account_id: remote.id,
            onboarding_url: link.url,
            expires_at: link.expires_at,
            status: account.status,
        })
    }

    pub async fn refresh_onboarding_link(&self, payee_id: &str) -> AppResult<OnboardingResult> {
        let account = self.require_sub_account(payee_id).await?;
        let sub_account_id = account.sub_account_id.clone().unwrap_or_default();

        let kind = if account.details_submitted {
            AccountLinkKind::Update
        } else {
            AccountLinkKind::Onboarding
        };
        let link = self.processor.create_account_link(&sub_account_id, kind).await?;

        Ok(OnboardingResult {
            sub_account_id,
            onboarding_url: link.url,
            expires_at: link.expires_at,
            status: account.status,
        })
    }

    /// Live status from the processor, written through to the store.
    /// A payee without a sub-account gets a NOT_CONNECTED view, not an error.
    pub async fn check_status(&self, payee_id: &str) -> AppResult<AccountStatusView> {
        let Some(account) = self.accounts.get(payee_id).await? else {
            return Ok(AccountStatusView::not_connected(payee_id));
        };
        let Some(sub_account_id) = account.sub_account_id.clone() else {
            return Ok(AccountStatusView::not_connected(payee_id));
        };

        let remote = self.processor.retrieve_account(&sub_account_id).await?;
        let snapshot = AccountSnapshot::from_processor(&remote, Utc::now());

        let current = match self.accounts.apply_snapshot(&snapshot).await? {
            Some(updated) => updated,
            // RESTRICTED, or a newer observation landed first
            None => self.accounts.get(payee_id).await?.unwrap_or(account),
        };

        Ok(AccountStatusView::from(&current))
    }

    pub async fn create_dashboard_link(&self, payee_id: &str) -> AppResult<String> {
        let account = self.require_sub_account(payee_id).await?;
        if !matches!(account.status, AccountStatus::Active | AccountStatus::Pending) {
            return Err(AppError::domain(DomainError::NotOnboarded {
                payee_id: payee_id.to_string(),
            }));
        }

        let sub_account_id = account.sub_account_id.unwrap_or_default();
        let link = self.processor.create_login_link(&sub_account_id).await?;
        Ok(link.url)
    }

    /// Set or clear the payee's fee override
    pub async fn set_fee_policy(
        &self,
        payee_id: &str,
        policy: Option<FeePolicy>,
    ) -> AppResult<PayeeAccount> {
        if let Some(policy) = &policy {
            policy.validate()?;
        }
        self.accounts
            .set_fee_policy(payee_id, policy)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::NotOnboarded {
                    payee_id: payee_id.to_string(),
                })
            })
    }

    async fn require_sub_account(&self, payee_id: &str) -> AppResult<PayeeAccount> {
        match self.accounts.get(payee_id).await? {
            Some(account) if account.sub_account_id.is_some() => Ok(account),
            _ => Err(AppError::domain(DomainError::NotOnboarded {
                payee_id: payee_id.to_string(),
            })),
        }
    }
}
