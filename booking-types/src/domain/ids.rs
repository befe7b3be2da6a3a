//! Strongly-typed UUID identifiers.
//!
//! Every entity gets its own identifier type so a `GuideId` can never be
//! passed where a `ListingId` is expected. The types are generated by
//! `define_ids!`; add a line there to introduce a new one.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

macro_rules! define_ids {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
            #[serde(transparent)]
            pub struct $name(Uuid);

            impl $name {
                /// Creates a new random identifier.
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                /// Creates an identifier from an existing UUID.
                pub fn from_uuid(uuid: Uuid) -> Self {
                    Self(uuid)
                }

                /// Returns the underlying UUID.
                pub fn as_uuid(&self) -> &Uuid {
                    &self.0
                }

                /// Returns the UUID value.
                pub fn into_uuid(self) -> Uuid {
                    self.0
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl std::str::FromStr for $name {
                type Err = uuid::Error;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Ok(Self(Uuid::parse_str(s)?))
                }
            }
        )+
    };
}

define_ids! {
    /// Unique identifier for a Booking.
    BookingId,
    /// Unique identifier for a Payment.
    PaymentId,
    /// Unique identifier for a Guide.
    GuideId,
    /// Unique identifier for a Listing.
    ListingId,
    /// Unique identifier for a Tourist.
    TouristId,
    /// Unique identifier for an API key.
    ApiKeyId,
}
