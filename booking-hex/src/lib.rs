//! # Booking Hex
//!
//! Application service layer and HTTP adapter for the booking payment service.
//!
//! ## Architecture
//!
//! - `service/` - Booking orchestration (checkout, reads, administrative updates)
//! - `reconciler/` - Applies payment gateway webhooks exactly once
//! - `inbound/` - HTTP adapter (Axum server)
//!
//! Both services are generic over `R: BookingRepository`; the booking service
//! is additionally generic over `G: PaymentGateway`, so tests can inject
//! in-memory adapters.

pub mod inbound;
pub mod openapi;
pub mod reconciler;
pub mod service;

#[cfg(test)]
mod service_tests;

pub use reconciler::WebhookReconciler;
pub use service::{BookingService, CheckoutConfig};
