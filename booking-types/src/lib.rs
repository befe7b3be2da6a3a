//! # Booking Types
//!
//! Domain types and port traits for the booking payment service.
//! This crate has ZERO external IO dependencies - only data structures,
//! business rules, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the hexagonal architecture:
//! - `domain/` - Pure domain types (Money, Booking, Payment, catalog, webhook events)
//! - `ports/` - Trait definitions that adapters must implement
//! - `dto/` - Data Transfer Objects for API boundaries
//! - `error/` - Domain and application error types

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use domain::{
    Actor, ApiKey, ApiKeyId, Booking, BookingDetails, BookingId, BookingStatus, CheckoutMetadata,
    CheckoutSessionObject, Currency, GatewayEvent, GatewayEventKind, Guide, GuideId,
    GuideSummary, LedgerEntry, Listing, ListingId, ListingSummary, Money, NewBooking, Payment,
    PaymentId, PaymentStatus, PaymentSummary, Role, Tourist, TouristId, TouristSummary,
    WebhookOutcome,
};
pub use dto::*;
pub use error::{AppError, DomainError, RepoError};
pub use ports::{
    BookingRepository, CheckoutCompletion, CheckoutSession, CheckoutSessionRequest,
    GatewayError, LedgerWrite, PaymentGateway,
};
