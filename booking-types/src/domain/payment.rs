//! Payment domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::booking::PaymentStatus;
use super::ids::{BookingId, PaymentId};
use super::money::Money;

/// The monetary record tied 1:1 to a booking.
///
/// `amount` is the price snapshot taken when the booking was created and is
/// never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub id: PaymentId,
    pub booking_id: BookingId,
    pub amount: Money,
    /// Locally generated key sent to the gateway as `Idempotency-Key`
    pub transaction_id: String,
    pub status: PaymentStatus,
    /// Gateway event that last mutated this row
    pub stripe_event_id: Option<String>,
    pub checkout_session_id: Option<String>,
    /// Snapshot of the last applied gateway payload
    #[schema(value_type = Option<Object>)]
    pub payment_gateway_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
