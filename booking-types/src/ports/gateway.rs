//! Payment gateway port.
//!
//! This trait defines the interface for hosted checkout providers.
//! Implementations can be HTTP clients, sandbox gateways, mocks, etc.

use crate::domain::{CheckoutMetadata, Money};

/// Error type for gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway timed out")]
    Timeout,

    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Payment gateway rejected the request: {0}")]
    Rejected(String),
}

/// Everything needed to open a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub amount: Money,
    /// Line item shown on the checkout page
    pub description: String,
    pub customer_email: Option<String>,
    pub metadata: CheckoutMetadata,
    pub success_url: String,
    pub cancel_url: String,
    /// Makes retried creations return the same session
    pub idempotency_key: String,
}

/// A session created by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    /// Redirect target for the customer
    pub url: String,
}

/// Port trait for payment gateways.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    /// Creates a hosted checkout session.
    async fn create_checkout_session(
        &self,
        req: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError>;
}
