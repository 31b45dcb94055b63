//! Membership model - the (user, tenant, role) relation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Role;

/// Membership entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Membership {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub joined_utc: DateTime<Utc>,
}

/// One row of a tenant's member list.
#[derive(Debug, Clone, Serialize)]
pub struct MemberRecord {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub joined_utc: DateTime<Utc>,
}
