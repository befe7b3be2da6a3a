//! Domain models for the booking payment service.

pub mod actor;
pub mod api_key;
pub mod booking;
pub mod catalog;
pub mod ids;
pub mod money;
pub mod payment;
pub mod webhook;

pub use actor::{Actor, Role};
pub use api_key::ApiKey;
pub use booking::{
    Booking, BookingDetails, BookingStatus, GuideSummary, ListingSummary, NewBooking,
    PaymentStatus, PaymentSummary, TouristSummary, parse_booking_date,
};
pub use catalog::{Guide, Listing, Tourist};
pub use ids::{ApiKeyId, BookingId, GuideId, ListingId, PaymentId, TouristId};
pub use money::{Currency, Money};
pub use payment::Payment;
pub use webhook::{
    CheckoutMetadata, CheckoutSessionObject, GatewayEvent, GatewayEventData, GatewayEventKind,
    LedgerEntry, WebhookOutcome,
};
