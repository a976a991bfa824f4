//! Payment provider abstraction.
//!
//! The service talks to exactly one provider (PaySuite) through two calls:
//! create a checkout for a reference, and fetch the current remote state of a
//! payment. Both are bounded by a timeout and never run while a database lock
//! is held.

use crate::config::ConfigError;
use crate::types::{Money, PaymentMethod, Reference};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

pub mod mock;
pub mod paysuite;

pub use mock::MockPaymentProvider;
pub use paysuite::PaySuiteClient;

/// Provider result
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Boxed provider future
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = ProviderResult<T>> + Send + 'a>>;

/// Provider error
///
/// Every variant is transient from the reconciliation point of view: callers
/// treat the remote state as unknown and leave stored status untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Credentials missing; raised before any network call
    #[error("payment provider is not configured: {0}")]
    Configuration(#[from] ConfigError),
    /// Connection or protocol failure
    #[error("payment provider request failed: {0}")]
    Transport(String),
    /// No response within the configured timeout
    #[error("payment provider timed out")]
    Timeout,
    /// The provider answered but did not report success
    #[error("payment provider rejected the request (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Provider message, or a generic one
        message: String,
    },
    /// Success envelope without the fields we need
    #[error("payment provider returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transport(_) => "transport",
            Self::Timeout => "timeout",
            Self::Rejected { .. } => "rejected",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Checkout creation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Amount to charge
    pub amount: Money,
    /// Merchant reference
    pub reference: Reference,
    /// Text shown on the checkout page
    pub description: String,
    /// Where the payer is sent afterwards
    pub return_url: String,
    /// Where the provider posts webhooks
    pub callback_url: String,
    /// Preselected channel
    pub method: Option<PaymentMethod>,
}

/// A checkout created by the provider.
#[derive(Clone, Debug, PartialEq)]
pub struct CreatedPayment {
    /// Provider payment ID
    pub provider_id: String,
    /// Hosted checkout page; validated by the caller
    pub checkout_url: Option<String>,
    /// The `data` object of the provider response
    pub raw: Value,
}

/// Remote payment state as returned by the provider.
#[derive(Clone, Debug, PartialEq)]
pub struct RemotePaymentState {
    /// The `data` object of the provider response
    pub raw: Value,
}

/// Payment provider trait
pub trait PaymentProvider: Send + Sync {
    /// Create a checkout for a payment.
    ///
    /// # Errors
    ///
    /// Returns error if the call fails, times out, or the provider does not
    /// report success.
    fn create_payment_request(&self, request: PaymentRequest) -> ProviderFuture<'_, CreatedPayment>;

    /// Fetch the current state of a payment by provider ID.
    ///
    /// # Errors
    ///
    /// Same conditions as [`PaymentProvider::create_payment_request`].
    fn fetch_payment_state(&self, provider_id: String) -> ProviderFuture<'_, RemotePaymentState>;
}

/// Read a JSON scalar as an identifier string (providers mix strings and numbers).
pub(crate) fn json_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
