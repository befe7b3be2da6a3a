//! Booking domain model and status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::catalog::{Guide, Listing, Tourist};
use super::ids::{BookingId, GuideId, ListingId, PaymentId, TouristId};
use super::money::Money;
use crate::error::DomainError;

/// Lifecycle of a reservation.
///
/// Only `Pending` is assigned automatically; every other value is set by an
/// administrative status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AsRef<str> for BookingStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(DomainError::ValidationError(format!(
                "Unknown booking status: {}",
                other
            ))),
        }
    }
}

/// Payment state shared by `Booking.payment_status` and `Payment.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Unpaid,
}

impl PaymentStatus {
    /// Maps the gateway's `payment_status` field of a completed checkout session.
    pub fn from_gateway(payment_status: Option<&str>) -> Self {
        match payment_status {
            Some("paid") => Self::Paid,
            _ => Self::Unpaid,
        }
    }

    /// `Paid` is terminal: once recorded it can only be re-asserted.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        match self {
            Self::Paid => next == Self::Paid,
            Self::Pending | Self::Unpaid => true,
        }
    }

    /// Returns an error when moving to `next` would regress a settled payment.
    pub fn ensure_transition(self, next: PaymentStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::PaymentStatusRegression {
                from: self,
                to: next,
            })
        }
    }
}

impl AsRef<str> for PaymentStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Unpaid => "UNPAID",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "UNPAID" => Ok(Self::Unpaid),
            other => Err(DomainError::ValidationError(format!(
                "Unknown payment status: {}",
                other
            ))),
        }
    }
}

/// A reservation linking a tourist to a guide, optionally via a listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Booking {
    pub id: BookingId,
    pub tourist_id: TouristId,
    pub guide_id: GuideId,
    pub listing_id: Option<ListingId>,
    pub booking_date: DateTime<Utc>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parses a client-supplied ISO-8601 date-time into UTC.
pub fn parse_booking_date(raw: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::InvalidBookingDate(format!("{} ({})", raw, e)))
}

/// A booking and its payment, prepared in memory before anything is persisted.
///
/// Identifiers and the price snapshot are fixed here so the checkout session
/// can reference them before the rows are committed.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub booking_id: BookingId,
    pub payment_id: PaymentId,
    /// Idempotency key sent to the gateway
    pub transaction_id: String,
    pub tourist_id: TouristId,
    pub guide_id: GuideId,
    pub listing_id: Option<ListingId>,
    pub booking_date: DateTime<Utc>,
    /// Price snapshot taken from the listing or the guide's flat fee
    pub amount: Money,
    /// Human-readable line item for the checkout page
    pub description: String,
    pub checkout_session_id: Option<String>,
}

impl NewBooking {
    /// Validates the request against the catalog and captures the price.
    pub fn prepare(
        tourist: &Tourist,
        guide: &Guide,
        listing: Option<&Listing>,
        booking_date: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if let Some(listing) = listing {
            if listing.guide_id != guide.id {
                return Err(DomainError::ListingGuideMismatch {
                    listing: listing.id.to_string(),
                    guide: guide.id.to_string(),
                });
            }
        }

        let (amount, description) = match listing {
            Some(listing) => (listing.price, format!("Tour Booking: {}", listing.title)),
            None => (guide.fee, format!("Guide Booking: {}", guide.name)),
        };

        Ok(Self {
            booking_id: BookingId::new(),
            payment_id: PaymentId::new(),
            transaction_id: uuid::Uuid::new_v4().to_string(),
            tourist_id: tourist.id,
            guide_id: guide.id,
            listing_id: listing.map(|l| l.id),
            booking_date,
            amount,
            description,
            checkout_session_id: None,
        })
    }

    /// Records the gateway session this booking will be paid through.
    pub fn with_checkout_session(mut self, session_id: impl Into<String>) -> Self {
        self.checkout_session_id = Some(session_id.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Read projection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TouristSummary {
    pub id: TouristId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GuideSummary {
    pub id: GuideId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListingSummary {
    pub id: ListingId,
    pub title: String,
    pub price: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentSummary {
    pub id: PaymentId,
    pub amount: Money,
    pub status: PaymentStatus,
}

/// A booking with the related rows a client needs to render it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: Booking,
    pub tourist: TouristSummary,
    pub guide: GuideSummary,
    pub listing: Option<ListingSummary>,
    pub payment: Option<PaymentSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;

    fn catalog() -> (Tourist, Guide, Listing) {
        let tourist = Tourist::new("T1", "t1@example.com").unwrap();
        let guide = Guide::new("G1", Money::new(500, Currency::BDT).unwrap()).unwrap();
        let listing =
            Listing::new(guide.id, "Old Dhaka walk", Money::new(900, Currency::BDT).unwrap())
                .unwrap();
        (tourist, guide, listing)
    }

    #[test]
    fn test_paid_is_terminal() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Paid));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Unpaid));
        assert!(PaymentStatus::Unpaid.can_transition_to(PaymentStatus::Paid));
        assert!(PaymentStatus::Paid.can_transition_to(PaymentStatus::Paid));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Unpaid));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn test_gateway_status_mapping() {
        assert_eq!(PaymentStatus::from_gateway(Some("paid")), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from_gateway(Some("unpaid")), PaymentStatus::Unpaid);
        assert_eq!(PaymentStatus::from_gateway(None), PaymentStatus::Unpaid);
    }

    #[test]
    fn test_parse_booking_date() {
        let date = parse_booking_date("2025-06-01T10:00:00Z").unwrap();
        assert_eq!(date.to_rfc3339(), "2025-06-01T10:00:00+00:00");
        assert!(matches!(
            parse_booking_date("next tuesday"),
            Err(DomainError::InvalidBookingDate(_))
        ));
    }

    #[test]
    fn test_prepare_uses_guide_fee_without_listing() {
        let (tourist, guide, _) = catalog();
        let date = parse_booking_date("2025-06-01T10:00:00Z").unwrap();
        let draft = NewBooking::prepare(&tourist, &guide, None, date).unwrap();

        assert_eq!(draft.amount.amount(), 500);
        assert!(draft.listing_id.is_none());
        assert!(draft.description.contains("G1"));
    }

    #[test]
    fn test_prepare_uses_listing_price() {
        let (tourist, guide, listing) = catalog();
        let date = parse_booking_date("2025-06-01T10:00:00Z").unwrap();
        let draft = NewBooking::prepare(&tourist, &guide, Some(&listing), date).unwrap();

        assert_eq!(draft.amount.amount(), 900);
        assert_eq!(draft.listing_id, Some(listing.id));
    }

    #[test]
    fn test_prepare_rejects_foreign_listing() {
        let (tourist, guide, _) = catalog();
        let other = Guide::new("G2", Money::new(100, Currency::BDT).unwrap()).unwrap();
        let listing =
            Listing::new(other.id, "Sundarbans", Money::new(900, Currency::BDT).unwrap()).unwrap();
        let date = parse_booking_date("2025-06-01T10:00:00Z").unwrap();

        let result = NewBooking::prepare(&tourist, &guide, Some(&listing), date);
        assert!(matches!(
            result,
            Err(DomainError::ListingGuideMismatch { .. })
        ));
    }
}
