//! Membership roles.
//!
//! Roles form a closed ladder `owner > admin > member`; permission checks are
//! comparisons on that ladder rather than string matching.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Role a user holds inside one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Role::Owner => 3,
            Role::Admin => 2,
            Role::Member => 1,
        }
    }

    /// Owners and admins manage membership and invitations.
    pub fn can_manage_members(&self) -> bool {
        *self >= Role::Admin
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Role an invitation may carry. Ownership is never granted by invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationRole {
    Admin,
    Member,
}

impl InvitationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationRole::Admin => "admin",
            InvitationRole::Member => "member",
        }
    }
}

impl From<InvitationRole> for Role {
    fn from(role: InvitationRole) -> Self {
        match role {
            InvitationRole::Admin => Role::Admin,
            InvitationRole::Member => Role::Member,
        }
    }
}

impl TryFrom<Role> for InvitationRole {
    type Error = String;

    fn try_from(role: Role) -> Result<Self, Self::Error> {
        match role {
            Role::Admin => Ok(InvitationRole::Admin),
            Role::Member => Ok(InvitationRole::Member),
            Role::Owner => Err("Invitations cannot grant ownership".to_string()),
        }
    }
}

impl FromStr for InvitationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_str(s).and_then(InvitationRole::try_from)
    }
}

impl fmt::Display for InvitationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Owner > Role::Admin);
        assert!(Role::Admin > Role::Member);
        assert!(Role::Owner > Role::Member);
        assert_eq!(
            [Role::Member, Role::Owner, Role::Admin].iter().max(),
            Some(&Role::Owner)
        );
    }

    #[test]
    fn test_can_manage_members() {
        assert!(Role::Owner.can_manage_members());
        assert!(Role::Admin.can_manage_members());
        assert!(!Role::Member.can_manage_members());
    }

    #[test]
    fn test_role_parsing() {
        for role in [Role::Owner, Role::Admin, Role::Member] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("Owner".parse::<Role>().is_err());
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn test_invitation_role_never_owner() {
        assert!("owner".parse::<InvitationRole>().is_err());
        assert!(InvitationRole::try_from(Role::Owner).is_err());
        assert_eq!("admin".parse::<InvitationRole>(), Ok(InvitationRole::Admin));
        assert_eq!(Role::from(InvitationRole::Member), Role::Member);
    }

    #[test]
    fn test_serde_representation() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: InvitationRole = serde_json::from_str("\"member\"").unwrap();
        assert_eq!(role, InvitationRole::Member);
        assert!(serde_json::from_str::<InvitationRole>("\"owner\"").is_err());
    }
}
