//! Caller roles.
//!
//! The role stored with an API key is resolved exactly once, at the HTTP
//! boundary, into an [`Actor`]. Services match on the variant instead of
//! re-inspecting role strings.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::ids::{GuideId, TouristId};
use crate::error::DomainError;

/// Stored role of an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    Admin,
    Guide,
    Tourist,
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        match self {
            Self::SuperAdmin => "SUPER_ADMIN",
            Self::Admin => "ADMIN",
            Self::Guide => "GUIDE",
            Self::Tourist => "TOURIST",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUPER_ADMIN" => Ok(Self::SuperAdmin),
            "ADMIN" => Ok(Self::Admin),
            "GUIDE" => Ok(Self::Guide),
            "TOURIST" => Ok(Self::Tourist),
            other => Err(DomainError::UnknownRole(other.to_string())),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    SuperAdmin,
    Admin,
    Guide(GuideId),
    Tourist(TouristId),
}

impl Actor {
    /// Builds an actor from a stored role and principal.
    ///
    /// Guide and tourist keys must be bound to the principal they act for.
    pub fn resolve(role: Role, principal_id: Option<Uuid>) -> Result<Self, DomainError> {
        match (role, principal_id) {
            (Role::SuperAdmin, _) => Ok(Self::SuperAdmin),
            (Role::Admin, _) => Ok(Self::Admin),
            (Role::Guide, Some(id)) => Ok(Self::Guide(GuideId::from_uuid(id))),
            (Role::Tourist, Some(id)) => Ok(Self::Tourist(TouristId::from_uuid(id))),
            (role, None) => Err(DomainError::ValidationError(format!(
                "{} keys require a principal_id",
                role
            ))),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::SuperAdmin => Role::SuperAdmin,
            Self::Admin => Role::Admin,
            Self::Guide(_) => Role::Guide,
            Self::Tourist(_) => Role::Tourist,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::SuperAdmin | Self::Admin)
    }
}
