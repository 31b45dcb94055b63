//! Tenant model - an isolated organization.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::Role;

/// Tenant entity. `active = false` is a soft delete.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Tenant {
    /// Create a new active tenant.
    pub fn new(slug: String, display_name: String) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: Uuid::new_v4(),
            slug,
            display_name,
            active: true,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// A tenant as seen by one of its members.
#[derive(Debug, Clone, Serialize)]
pub struct TenantMembership {
    pub tenant_id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub role: Role,
    pub joined_utc: DateTime<Utc>,
}
