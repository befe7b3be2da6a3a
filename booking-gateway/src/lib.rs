//! # Booking Gateway
//!
//! Outbound adapters implementing the `PaymentGateway` port:
//! - `StripeGateway` talks to the Stripe Checkout Sessions API over HTTPS
//! - `SandboxGateway` issues sessions in memory for local runs and tests
//!
//! `Gateway` wraps whichever of the two the binary selected at startup.

use async_trait::async_trait;
use booking_types::{CheckoutSession, CheckoutSessionRequest, GatewayError, PaymentGateway};

pub mod sandbox;
pub mod stripe;

pub use sandbox::SandboxGateway;
pub use stripe::StripeGateway;

/// Gateway chosen from configuration.
pub enum Gateway {
    Stripe(StripeGateway),
    Sandbox(SandboxGateway),
}

impl Gateway {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stripe(_) => "stripe",
            Self::Sandbox(_) => "sandbox",
        }
    }
}

#[async_trait]
impl PaymentGateway for Gateway {
    async fn create_checkout_session(
        &self,
        req: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        match self {
            Self::Stripe(gateway) => gateway.create_checkout_session(req).await,
            Self::Sandbox(gateway) => gateway.create_checkout_session(req).await,
        }
    }
}
