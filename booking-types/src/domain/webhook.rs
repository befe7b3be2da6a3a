//! Inbound payment gateway events and the outcomes of reconciling them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::booking::PaymentStatus;
use super::ids::{BookingId, PaymentId};

/// Event envelope as delivered by the gateway (`{id, type, data.object, ...}`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GatewayEvent {
    /// Gateway-assigned event identifier, the deduplication key
    #[schema(example = "evt_1PQx2a")]
    pub id: String,
    #[serde(rename = "type", default)]
    #[schema(example = "checkout.session.completed")]
    pub event_type: String,
    /// Absent or partial payloads still reach the reconciler and are acknowledged
    #[serde(default)]
    pub data: GatewayEventData,
    /// Unix timestamp at which the gateway emitted the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct GatewayEventData {
    #[serde(default)]
    #[schema(value_type = Object)]
    pub object: serde_json::Value,
}

impl GatewayEvent {
    pub fn kind(&self) -> GatewayEventKind {
        GatewayEventKind::from(self.event_type.as_str())
    }
}

/// Event types the reconciler distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEventKind {
    CheckoutSessionCompleted,
    CheckoutSessionExpired,
    PaymentIntentFailed,
    Other,
}

impl From<&str> for GatewayEventKind {
    fn from(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "checkout.session.expired" => Self::CheckoutSessionExpired,
            "payment_intent.payment_failed" => Self::PaymentIntentFailed,
            _ => Self::Other,
        }
    }
}

/// Identifiers attached to a checkout session so its completion can be
/// routed back to the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub booking_id: BookingId,
    pub payment_id: PaymentId,
}

impl CheckoutMetadata {
    pub const BOOKING_ID_KEY: &'static str = "bookingId";
    pub const PAYMENT_ID_KEY: &'static str = "paymentId";

    pub fn to_pairs(&self) -> [(&'static str, String); 2] {
        [
            (Self::BOOKING_ID_KEY, self.booking_id.to_string()),
            (Self::PAYMENT_ID_KEY, self.payment_id.to_string()),
        ]
    }
}

/// The fields of a checkout session object the reconciler reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutSessionObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl CheckoutSessionObject {
    /// Reads the session out of an event; malformed objects read as empty.
    pub fn from_event(event: &GatewayEvent) -> Self {
        serde_json::from_value(event.data.object.clone()).unwrap_or_default()
    }

    /// Returns the booking/payment pair, or `None` if either is absent or malformed.
    pub fn metadata_ids(&self) -> Option<CheckoutMetadata> {
        let metadata = self.metadata.as_ref()?;
        let booking_id = metadata
            .get(CheckoutMetadata::BOOKING_ID_KEY)?
            .parse()
            .ok()?;
        let payment_id = metadata
            .get(CheckoutMetadata::PAYMENT_ID_KEY)?
            .parse()
            .ok()?;
        Some(CheckoutMetadata {
            booking_id,
            payment_id,
        })
    }

    pub fn resolved_status(&self) -> PaymentStatus {
        PaymentStatus::from_gateway(self.payment_status.as_deref())
    }
}

/// Result of handling one delivery. Every variant is acknowledged to the
/// gateway with a success response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Booking and payment rows were updated.
    Applied {
        booking_id: BookingId,
        status: PaymentStatus,
    },
    /// The event id is already in the ledger.
    AlreadyProcessed,
    MissingMetadata,
    BookingNotFound,
    PaymentNotFound,
    /// A non-paid result arrived for a payment that is already PAID.
    AlreadySettled,
    /// Informational event, recorded without state changes.
    Acknowledged,
    /// Event type this service does not handle.
    Ignored,
}

impl WebhookOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Applied { .. } | Self::Acknowledged | Self::Ignored => {
                "Webhook processed successfully"
            }
            Self::AlreadyProcessed => "Event already processed",
            Self::MissingMetadata => "Missing metadata",
            Self::BookingNotFound => "Booking not found",
            Self::PaymentNotFound => "Payment not found",
            Self::AlreadySettled => "Payment already settled",
        }
    }

    /// Code stored in the ledger.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "APPLIED",
            Self::AlreadyProcessed => "DUPLICATE",
            Self::MissingMetadata => "MISSING_METADATA",
            Self::BookingNotFound => "BOOKING_NOT_FOUND",
            Self::PaymentNotFound => "PAYMENT_NOT_FOUND",
            Self::AlreadySettled => "ALREADY_SETTLED",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::Ignored => "IGNORED",
        }
    }
}

/// One row of the idempotency ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub event_id: String,
    pub event_type: String,
    pub outcome: String,
    pub booking_id: Option<BookingId>,
    pub received_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(event: &GatewayEvent, outcome: WebhookOutcome, booking_id: Option<BookingId>) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            outcome: outcome.code().to_string(),
            booking_id,
            received_at: Utc::now(),
        }
    }
}
