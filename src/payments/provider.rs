use crate::payments::error::PaymentResult;
use crate::payments::types::{
    AccountLink, AccountLinkKind, AccountProfile, CheckoutSessionRequest, ProcessorAccount,
    ProcessorBalance, ProcessorCheckoutSession,
};
use async_trait::async_trait;

/// Operations the settlement engine needs from the external processor.
///
/// Implementations must be safe to call concurrently. Creation calls carry an
/// idempotency key so that a retried request never produces a second object.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Look up a sub-account previously created for `payee_id`.
    ///
    /// Used before creation so that an account created remotely but never
    /// recorded locally is adopted instead of duplicated.
    async fn find_account_by_payee(&self, payee_id: &str) -> PaymentResult<Option<ProcessorAccount>>;

    async fn create_account(
        &self,
        payee_id: &str,
        profile: &AccountProfile,
    ) -> PaymentResult<ProcessorAccount>;

    async fn retrieve_account(&self, account_id: &str) -> PaymentResult<ProcessorAccount>;

    async fn create_account_link(
        &self,
        account_id: &str,
        kind: AccountLinkKind,
    ) -> PaymentResult<AccountLink>;

    /// Single-use link into the payee's hosted dashboard
    async fn create_login_link(&self, account_id: &str) -> PaymentResult<AccountLink>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> PaymentResult<ProcessorCheckoutSession>;

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> PaymentResult<ProcessorCheckoutSession>;

    async fn retrieve_balance(&self, account_id: &str) -> PaymentResult<ProcessorBalance>;

    async fn health_check(&self) -> PaymentResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}
