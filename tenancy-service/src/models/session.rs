//! Session model - interactive logins with a selectable tenant.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::UserSummary;

/// Session entity. Only the digest of the token is persisted.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub token_hash: String,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub expiry_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl Session {
    /// Create a new session expiring a fixed duration after creation.
    pub fn new(
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        token_hash: String,
        lifetime: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            token_hash,
            user_id,
            tenant_id,
            expiry_utc: now + lifetime,
            created_utc: now,
        }
    }

    /// Check if session is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }
}

/// Result of validating a session token.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub user: UserSummary,
    /// Currently selected tenant, returned verbatim. `None` when the user has
    /// no organization selected.
    pub tenant_id: Option<Uuid>,
    pub expiry_utc: DateTime<Utc>,
}
