//! API Key domain type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actor::{Actor, Role};
use super::ids::ApiKeyId;
use crate::error::DomainError;

/// An API key for authenticating requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub name: String,
    pub key_hash: String,
    pub role: Role,
    /// Guide or tourist the key acts for
    pub principal_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Creates a new API key with the given name and hash.
    pub fn new(name: String, key_hash: String, role: Role, principal_id: Option<Uuid>) -> Self {
        Self {
            id: ApiKeyId::new(),
            name,
            key_hash,
            role,
            principal_id,
            is_active: true,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    /// Resolves the caller this key authenticates.
    pub fn actor(&self) -> Result<Actor, DomainError> {
        Actor::resolve(self.role, self.principal_id)
    }
}
