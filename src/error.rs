//! Unified error handling for the settlement backend
//!
//! Every failure surfaced over HTTP is an [`AppError`]: a kind (domain,
//! validation, authorization, infrastructure, external) plus optional request
//! context. The kind decides the HTTP status, the machine-readable
//! [`ErrorCode`], the user-facing message and whether the caller may retry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ALREADY_ONBOARDED")]
    AlreadyOnboarded,
    #[serde(rename = "NOT_ONBOARDED")]
    NotOnboarded,
    #[serde(rename = "PAYEE_NOT_READY")]
    PayeeNotReady,
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "SESSION_NOT_FOUND")]
    SessionNotFound,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "ORDER_ALREADY_PAID")]
    OrderAlreadyPaid,

    // Validation errors (400)
    #[serde(rename = "INVALID_LINE_ITEM")]
    InvalidLineItem,
    #[serde(rename = "AMOUNT_OUT_OF_RANGE")]
    AmountOutOfRange,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "INVALID_FEE_PERCENTAGE")]
    InvalidFeePercentage,
    #[serde(rename = "SIGNATURE_INVALID")]
    SignatureInvalid,
    #[serde(rename = "SIGNATURE_MISSING")]
    SignatureMissing,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,

    // Authorization (401/403)
    #[serde(rename = "UNAUTHENTICATED")]
    Unauthenticated,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "EXTERNAL_PROCESSOR_ERROR")]
    ExternalProcessorError,
    #[serde(rename = "ORDER_SERVICE_ERROR")]
    OrderServiceError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Business-rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Payee already has a sub-account and no refresh was requested
    AlreadyOnboarded { payee_id: String },
    /// Operation requires a sub-account the payee does not have
    NotOnboarded { payee_id: String },
    /// Payee sub-account is not ACTIVE
    PayeeNotReady { payee_id: String, status: String },
    /// Forward-only status table rejected the requested transition
    InvalidTransition { from: String, to: String },
    /// No session matched after every fallback path
    SessionNotFound { identifier: String },
    /// Order referenced by a checkout does not exist
    OrderNotFound { order_id: String },
    /// Order already carries a settled payment
    OrderAlreadyPaid { order_id: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External collaborator errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment processor call failed
    Processor { message: String, is_retryable: bool },
    /// Order subsystem call failed
    OrderService { message: String },
    /// External call exceeded its deadline
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// A checkout line item is malformed
    InvalidLineItem {
        index: usize,
        name: String,
        reason: String,
    },
    /// Gross amount is zero, negative, overflowing, or above the ceiling
    AmountOutOfRange { amount: String, max: i64 },
    /// Gross amount passed to fee math is not positive
    InvalidAmount { amount: String, reason: String },
    /// Fee percentage outside [0, 100] or fixed fee above gross
    InvalidFeePercentage { value: String },
    /// Signature header did not match the body
    SignatureInvalid { reason: String },
    /// Signature header absent
    SignatureMissing,
    /// Required field missing
    MissingField { field: String },
    /// Field present but malformed
    InvalidField { field: String, reason: String },
}

/// Principal errors
#[derive(Debug, Clone)]
pub enum AuthorizationError {
    /// No authenticated principal on the request
    Unauthenticated,
    /// Principal is not authorized for this payee
    Forbidden { payee_id: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
    Authorization(AuthorizationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AlreadyOnboarded { .. } => 409,
                DomainError::NotOnboarded { .. } => 409,
                DomainError::PayeeNotReady { .. } => 422,
                DomainError::InvalidTransition { .. } => 409,
                DomainError::SessionNotFound { .. } => 404,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::OrderAlreadyPaid { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::Processor { .. } => 502,
                ExternalError::OrderService { .. } => 502,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::Authorization(err) => match err {
                AuthorizationError::Unauthenticated => 401,
                AuthorizationError::Forbidden { .. } => 403,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AlreadyOnboarded { .. } => ErrorCode::AlreadyOnboarded,
                DomainError::NotOnboarded { .. } => ErrorCode::NotOnboarded,
                DomainError::PayeeNotReady { .. } => ErrorCode::PayeeNotReady,
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
                DomainError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::OrderAlreadyPaid { .. } => ErrorCode::OrderAlreadyPaid,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Processor { .. } => ErrorCode::ExternalProcessorError,
                ExternalError::OrderService { .. } => ErrorCode::OrderServiceError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidLineItem { .. } => ErrorCode::InvalidLineItem,
                ValidationError::AmountOutOfRange { .. } => ErrorCode::AmountOutOfRange,
                ValidationError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                ValidationError::InvalidFeePercentage { .. } => ErrorCode::InvalidFeePercentage,
                ValidationError::SignatureInvalid { .. } => ErrorCode::SignatureInvalid,
                ValidationError::SignatureMissing => ErrorCode::SignatureMissing,
                ValidationError::MissingField { .. } | ValidationError::InvalidField { .. } => {
                    ErrorCode::ValidationError
                }
            },
            AppErrorKind::Authorization(err) => match err {
                AuthorizationError::Unauthenticated => ErrorCode::Unauthenticated,
                AuthorizationError::Forbidden { .. } => ErrorCode::Forbidden,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AlreadyOnboarded { payee_id } => format!(
                    "Payee '{}' already has a connected account. Request a refresh link instead",
                    payee_id
                ),
                DomainError::NotOnboarded { payee_id } => format!(
                    "Payee '{}' has not started onboarding with the payment processor",
                    payee_id
                ),
                DomainError::PayeeNotReady { payee_id, status } => format!(
                    "Payee '{}' cannot receive payments yet (status {}). Complete onboarding first",
                    payee_id, status
                ),
                DomainError::InvalidTransition { from, to } => {
                    format!("Payment cannot move from {} to {}", from, to)
                }
                DomainError::SessionNotFound { identifier } => {
                    format!("Payment session '{}' not found", identifier)
                }
                DomainError::OrderNotFound { order_id } => {
                    format!("Order '{}' not found", order_id)
                }
                DomainError::OrderAlreadyPaid { order_id } => {
                    format!("Order '{}' has already been paid", order_id)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::Processor { is_retryable, .. } => {
                    if *is_retryable {
                        "Payment processor is temporarily unavailable. Please try again".to_string()
                    } else {
                        "Payment processor rejected the request".to_string()
                    }
                }
                ExternalError::OrderService { .. } => {
                    "Order service is temporarily unavailable. Please try again".to_string()
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidLineItem {
                    index,
                    name,
                    reason,
                } => format!("Line item {} ('{}') is invalid: {}", index, name, reason),
                ValidationError::AmountOutOfRange { amount, max } => format!(
                    "Order total {} is out of range (must be between 1 and {})",
                    amount, max
                ),
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidFeePercentage { value } => {
                    format!("Fee '{}' is outside the allowed range", value)
                }
                ValidationError::SignatureInvalid { .. } => {
                    "Webhook signature verification failed".to_string()
                }
                ValidationError::SignatureMissing => "Webhook signature header missing".to_string(),
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Field '{}' is invalid: {}", field, reason)
                }
            },
            AppErrorKind::Authorization(err) => match err {
                AuthorizationError::Unauthenticated => "Authentication required".to_string(),
                AuthorizationError::Forbidden { payee_id } => {
                    format!("Not authorized to manage payee '{}'", payee_id)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Processor { is_retryable, .. } => *is_retryable,
                ExternalError::OrderService { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
            AppErrorKind::Authorization(_) => false,
        }
    }

    /// Structured details for the response body, when the kind carries any
    pub fn details(&self) -> Option<serde_json::Value> {
        match &self.kind {
            AppErrorKind::Validation(ValidationError::InvalidLineItem {
                index,
                name,
                reason,
            }) => Some(serde_json::json!({
                "index": index,
                "name": name,
                "reason": reason,
            })),
            AppErrorKind::Domain(DomainError::PayeeNotReady { status, .. }) => Some(
                serde_json::json!({ "status": status, "action": "complete_onboarding" }),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.user_message(), context),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// Conversions from layer errors live next to those errors
// (database/error.rs, payments/error.rs, services/fee_calculation.rs).

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
