//! Guides, listings and tourists.
//!
//! These rows are owned by the catalog side of the platform; the booking
//! engine only reads them when a reservation is created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{GuideId, ListingId, TouristId};
use super::money::Money;
use crate::error::DomainError;

/// A tour guide who can be booked directly for a flat fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guide {
    pub id: GuideId,
    pub name: String,
    /// Flat fee charged when a guide is booked without a listing
    pub fee: Money,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Guide {
    pub fn new(name: impl Into<String>, fee: Money) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "Guide name cannot be empty".into(),
            ));
        }
        Ok(Self {
            id: GuideId::new(),
            name,
            fee,
            is_deleted: false,
            created_at: Utc::now(),
        })
    }
}

/// A tour offered by exactly one guide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub guide_id: GuideId,
    pub title: String,
    pub price: Money,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn new(guide_id: GuideId, title: impl Into<String>, price: Money) -> Result<Self, DomainError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "Listing title cannot be empty".into(),
            ));
        }
        Ok(Self {
            id: ListingId::new(),
            guide_id,
            title,
            price,
            is_deleted: false,
            created_at: Utc::now(),
        })
    }
}

/// A traveller account that places bookings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tourist {
    pub id: TouristId,
    pub name: String,
    pub email: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Tourist {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Result<Self, DomainError> {
        let email = email.into();
        if !email.contains('@') {
            return Err(DomainError::ValidationError(format!(
                "Invalid email address: {}",
                email
            )));
        }
        Ok(Self {
            id: TouristId::new(),
            name: name.into(),
            email,
            is_deleted: false,
            created_at: Utc::now(),
        })
    }
}
