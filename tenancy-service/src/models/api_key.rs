//! API key model - machine credentials bound to one tenant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// API key entity. The secret itself is never stored.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKey {
    pub api_key_id: Uuid,
    pub tenant_id: Uuid,
    pub key_name: Option<String>,
    pub key_prefix: String,
    pub lookup_hash: String,
    pub secret_hash: String,
    pub active: bool,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub created_by_user_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl ApiKey {
    /// Usable for authentication at `now`.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expiry_utc.map_or(true, |expiry| now < expiry)
    }
}

/// API key response for API (no hashes).
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyResponse {
    pub api_key_id: Uuid,
    pub key_name: Option<String>,
    pub key_prefix: String,
    pub active: bool,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<&ApiKey> for ApiKeyResponse {
    fn from(k: &ApiKey) -> Self {
        Self {
            api_key_id: k.api_key_id,
            key_name: k.key_name.clone(),
            key_prefix: k.key_prefix.clone(),
            active: k.active,
            expiry_utc: k.expiry_utc,
            created_utc: k.created_utc,
        }
    }
}

/// Identity resolved from a valid machine credential.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyContext {
    pub api_key_id: Uuid,
    pub tenant_id: Uuid,
    pub key_name: Option<String>,
}
