//! Column parsing shared by the SQLite and PostgreSQL adapters.

use std::str::FromStr;

use booking_types::{
    ApiKey, ApiKeyId, Booking, BookingDetails, BookingId, BookingStatus, Currency, GuideId,
    GuideSummary, ListingId, ListingSummary, Money, Payment, PaymentId, PaymentStatus, PaymentSummary,
    RepoError, Role, TouristId, TouristSummary,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Status written to the ledger while the applying transaction is open.
pub const LEDGER_PROCESSING: &str = "PROCESSING";

pub fn db_error(e: impl std::fmt::Display) -> RepoError {
    RepoError::Database(e.to_string())
}

pub fn parse_currency(s: &str) -> Result<Currency, RepoError> {
    Currency::from_str(s).map_err(|_| RepoError::Database(format!("Unknown currency: {}", s)))
}

pub fn parse_money(amount: i64, currency: &str) -> Result<Money, RepoError> {
    Money::new(amount, parse_currency(currency)?).map_err(RepoError::Domain)
}

pub fn parse_booking_status(s: &str) -> Result<BookingStatus, RepoError> {
    BookingStatus::from_str(s).map_err(db_error)
}

pub fn parse_payment_status(s: &str) -> Result<PaymentStatus, RepoError> {
    PaymentStatus::from_str(s).map_err(db_error)
}

pub fn parse_role(s: &str) -> Result<Role, RepoError> {
    Role::from_str(s).map_err(db_error)
}

/// True when the error is a UNIQUE / PRIMARY KEY violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend-neutral row values
// ─────────────────────────────────────────────────────────────────────────────

/// Booking columns after the adapter decoded ids and timestamps.
pub struct BookingColumns {
    pub id: Uuid,
    pub tourist_id: Uuid,
    pub guide_id: Uuid,
    pub listing_id: Option<Uuid>,
    pub booking_date: DateTime<Utc>,
    pub status: String,
    pub payment_status: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingColumns {
    pub fn into_domain(self) -> Result<Booking, RepoError> {
        Ok(Booking {
            id: BookingId::from_uuid(self.id),
            tourist_id: TouristId::from_uuid(self.tourist_id),
            guide_id: GuideId::from_uuid(self.guide_id),
            listing_id: self.listing_id.map(ListingId::from_uuid),
            booking_date: self.booking_date,
            status: parse_booking_status(&self.status)?,
            payment_status: parse_payment_status(&self.payment_status)?,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Joined columns of the booking read projection.
pub struct DetailColumns {
    pub booking: BookingColumns,
    pub tourist_name: String,
    pub guide_name: String,
    pub listing_title: Option<String>,
    pub listing_price: Option<i64>,
    pub listing_currency: Option<String>,
    pub payment_id: Option<Uuid>,
    pub payment_amount: Option<i64>,
    pub payment_currency: Option<String>,
    pub payment_row_status: Option<String>,
}

impl DetailColumns {
    pub fn into_domain(self) -> Result<BookingDetails, RepoError> {
        let booking = self.booking.into_domain()?;

        let tourist = TouristSummary {
            id: booking.tourist_id,
            name: self.tourist_name,
        };
        let guide = GuideSummary {
            id: booking.guide_id,
            name: self.guide_name,
        };

        let listing = match (
            booking.listing_id,
            self.listing_title,
            self.listing_price,
            self.listing_currency,
        ) {
            (Some(id), Some(title), Some(price), Some(currency)) => Some(ListingSummary {
                id,
                title,
                price: parse_money(price, &currency)?,
            }),
            _ => None,
        };

        let payment = match (
            self.payment_id,
            self.payment_amount,
            self.payment_currency,
            self.payment_row_status,
        ) {
            (Some(id), Some(amount), Some(currency), Some(status)) => Some(PaymentSummary {
                id: PaymentId::from_uuid(id),
                amount: parse_money(amount, &currency)?,
                status: parse_payment_status(&status)?,
            }),
            _ => None,
        };

        Ok(BookingDetails {
            booking,
            tourist,
            guide,
            listing,
            payment,
        })
    }
}

/// Payment columns after decoding.
pub struct PaymentColumns {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub transaction_id: String,
    pub status: String,
    pub stripe_event_id: Option<String>,
    pub checkout_session_id: Option<String>,
    pub payment_gateway_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentColumns {
    pub fn into_domain(self) -> Result<Payment, RepoError> {
        Ok(Payment {
            id: PaymentId::from_uuid(self.id),
            booking_id: BookingId::from_uuid(self.booking_id),
            amount: parse_money(self.amount, &self.currency)?,
            transaction_id: self.transaction_id,
            status: parse_payment_status(&self.status)?,
            stripe_event_id: self.stripe_event_id,
            checkout_session_id: self.checkout_session_id,
            payment_gateway_data: self.payment_gateway_data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// API key columns after decoding.
pub struct ApiKeyColumns {
    pub id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub role: String,
    pub principal_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyColumns {
    pub fn into_domain(self) -> Result<ApiKey, RepoError> {
        Ok(ApiKey {
            id: ApiKeyId::from_uuid(self.id),
            name: self.name,
            key_hash: self.key_hash,
            role: parse_role(&self.role)?,
            principal_id: self.principal_id,
            is_active: self.is_active,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("BDT").unwrap(), Currency::BDT);
        assert!(matches!(parse_currency("XYZ"), Err(RepoError::Database(_))));
    }

    #[test]
    fn test_detail_columns_without_listing() {
        let now = Utc::now();
        let columns = DetailColumns {
            booking: BookingColumns {
                id: Uuid::new_v4(),
                tourist_id: Uuid::new_v4(),
                guide_id: Uuid::new_v4(),
                listing_id: None,
                booking_date: now,
                status: "PENDING".into(),
                payment_status: "PENDING".into(),
                is_deleted: false,
                created_at: now,
                updated_at: now,
            },
            tourist_name: "T1".into(),
            guide_name: "G1".into(),
            listing_title: None,
            listing_price: None,
            listing_currency: None,
            payment_id: Some(Uuid::new_v4()),
            payment_amount: Some(500),
            payment_currency: Some("BDT".into()),
            payment_row_status: Some("PENDING".into()),
        };

        let details = columns.into_domain().unwrap();
        assert!(details.listing.is_none());
        assert_eq!(details.payment.unwrap().amount.amount(), 500);
        assert_eq!(details.guide.name, "G1");
    }
}
