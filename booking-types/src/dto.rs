//! Data Transfer Objects (DTOs) for requests and responses.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{
    Actor, Booking, BookingId, BookingStatus, GuideId, PaymentId, PaymentStatus, TouristId,
};

// ─────────────────────────────────────────────────────────────────────────────
// Booking DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to book a guide, optionally through one of their listings.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    /// Guide being booked (UUID)
    #[schema(example = "5f0c1c9e-3a55-4c0e-9c1f-2f4b8f8f9a10")]
    pub guide_id: String,
    /// Optional listing offered by that guide (UUID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
    /// ISO-8601 date-time of the tour
    #[schema(example = "2025-06-01T10:00:00Z")]
    pub booking_date: String,
}

/// Response after a booking was created; the client redirects to `payment_url`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    /// Hosted checkout page of the payment gateway
    #[schema(example = "https://checkout.stripe.com/c/pay/cs_test_a1b2")]
    pub payment_url: String,
    pub booking_id: BookingId,
    pub payment_id: PaymentId,
}

/// Administrative status change. At least one field must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingStatusRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BookingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
}

impl UpdateBookingStatusRequest {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.payment_status.is_none()
    }
}

/// Query string of `GET /booking`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct BookingListParams {
    /// 1-based page number
    pub page: Option<u32>,
    /// Page size (max 100)
    pub limit: Option<u32>,
    pub status: Option<BookingStatus>,
    #[serde(alias = "payment_status")]
    pub payment_status: Option<PaymentStatus>,
    /// Column to order by (default `createdAt`)
    pub sort_by: Option<BookingSortField>,
    /// Direction (default `desc`)
    pub sort_order: Option<SortOrder>,
}

/// Columns a booking list may be ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum BookingSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    BookingDate,
}

impl BookingSortField {
    /// Column name in the `bookings` table.
    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::BookingDate => "booking_date",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Rows a caller is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingScope {
    All,
    Tourist(TouristId),
    Guide(GuideId),
}

impl BookingScope {
    /// Admins see everything; tourists and guides see the bookings they are party to.
    pub fn for_actor(actor: Actor) -> Self {
        match actor {
            Actor::SuperAdmin | Actor::Admin => Self::All,
            Actor::Tourist(id) => Self::Tourist(id),
            Actor::Guide(id) => Self::Guide(id),
        }
    }

    pub fn includes(&self, booking: &Booking) -> bool {
        match self {
            Self::All => true,
            Self::Tourist(id) => booking.tourist_id == *id,
            Self::Guide(id) => booking.guide_id == *id,
        }
    }
}

/// Normalized list query handed to the repository.
#[derive(Debug, Clone)]
pub struct BookingQuery {
    pub scope: BookingScope,
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub sort_by: BookingSortField,
    pub sort_order: SortOrder,
    pub page: u32,
    pub limit: u32,
}

impl BookingQuery {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(scope: BookingScope, params: &BookingListParams) -> Self {
        Self {
            scope,
            status: params.status,
            payment_status: params.payment_status,
            sort_by: params.sort_by.unwrap_or_default(),
            sort_order: params.sort_order.unwrap_or_default(),
            page: params.page.unwrap_or(1).max(1),
            limit: params
                .limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }

    /// `ORDER BY` clause over the `b` alias, with the id as tiebreak.
    pub fn order_by(&self) -> String {
        let direction = self.sort_order.as_sql();
        format!(
            "ORDER BY b.{} {}, b.id {}",
            self.sort_by.column(),
            direction,
            direction
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PageMeta {
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

/// A page of results.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub meta: PageMeta,
    pub data: Vec<T>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Webhook DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Acknowledgement returned to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    #[schema(example = "Webhook processed successfully")]
    pub message: String,
}
