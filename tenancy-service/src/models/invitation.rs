//! Invitation model - email-addressed, role-carrying offers of membership.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{normalize_email, InvitationRole};

/// Stored invitation status. Expiry is not a status; see [`is_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Revoked,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Revoked => "revoked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != InvitationStatus::Pending
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "declined" => Ok(InvitationStatus::Declined),
            "revoked" => Ok(InvitationStatus::Revoked),
            _ => Err(format!("Invalid invitation status: {}", s)),
        }
    }
}

/// Invitation entity.
#[derive(Debug, Clone, FromRow)]
pub struct Invitation {
    pub invitation_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub role_code: String,
    pub token_hash: String,
    pub status_code: String,
    pub invited_by_user_id: Uuid,
    pub expiry_utc: DateTime<Utc>,
    pub accepted_utc: Option<DateTime<Utc>>,
    pub decided_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Invitation {
    /// Create a new pending invitation expiring `validity` after now.
    pub fn new(
        tenant_id: Uuid,
        email: &str,
        role: InvitationRole,
        token_hash: String,
        invited_by_user_id: Uuid,
        validity: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            invitation_id: Uuid::new_v4(),
            tenant_id,
            email: normalize_email(email),
            role_code: role.as_str().to_string(),
            token_hash,
            status_code: InvitationStatus::Pending.as_str().to_string(),
            invited_by_user_id,
            expiry_utc: now + validity,
            accepted_utc: None,
            decided_utc: None,
            created_utc: now,
        }
    }

    /// Parsed status. Unknown codes are rejected by a CHECK constraint, so a
    /// parse failure means the row was written outside this service.
    pub fn status(&self) -> Result<InvitationStatus, String> {
        self.status_code.parse()
    }

    pub fn role(&self) -> Result<InvitationRole, String> {
        self.role_code.parse()
    }

    /// Whether this invitation addresses `email` (case-insensitive).
    pub fn is_addressed_to(&self, email: &str) -> bool {
        self.email == normalize_email(email)
    }
}

/// The single expiry predicate used by accept, decline, revoke and the
/// public lookup. Expired means strictly past the expiry instant.
pub fn is_expired(invitation: &Invitation, now: DateTime<Utc>) -> bool {
    now > invitation.expiry_utc
}

/// Invitation as listed to tenant administrators.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationResponse {
    pub invitation_id: Uuid,
    pub email: String,
    pub role: String,
    pub status: String,
    pub invited_by_user_id: Uuid,
    pub expiry_utc: DateTime<Utc>,
    pub is_expired: bool,
    pub created_utc: DateTime<Utc>,
}

impl InvitationResponse {
    pub fn from_invitation(invitation: &Invitation, now: DateTime<Utc>) -> Self {
        Self {
            invitation_id: invitation.invitation_id,
            email: invitation.email.clone(),
            role: invitation.role_code.clone(),
            status: invitation.status_code.clone(),
            invited_by_user_id: invitation.invited_by_user_id,
            expiry_utc: invitation.expiry_utc,
            is_expired: is_expired(invitation, now),
            created_utc: invitation.created_utc,
        }
    }
}

/// Redacted view served to unauthenticated recipients. Deliberately omits
/// the invitation id and the inviter's email.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationPreview {
    pub organization_name: String,
    pub inviter_name: String,
    pub role: InvitationRole,
    pub expiry_utc: DateTime<Utc>,
    pub is_expired: bool,
    pub status: InvitationStatus,
}
