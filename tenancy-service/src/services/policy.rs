//! Membership policy.
//!
//! Pure decisions over already-loaded roles. The membership store calls these
//! inside its write transaction after locking the rows involved, so a decision
//! is always made against the current state.

use uuid::Uuid;

use crate::models::Role;
use crate::services::AuthorityError;

/// Role ladder rules for membership changes.
#[derive(Debug, Clone)]
pub struct MembershipPolicy;

impl MembershipPolicy {
    /// Actor may add `role` to the tenant, directly or by invitation.
    pub fn check_add(actor: Option<Role>, role: Role) -> Result<(), AuthorityError> {
        if role == Role::Owner {
            return Err(ownership_by_transfer_only());
        }
        Self::require_manager(actor)?;
        Ok(())
    }

    /// Actor may invite users into the tenant.
    pub fn check_invite(actor: Option<Role>) -> Result<(), AuthorityError> {
        Self::require_manager(actor).map(|_| ())
    }

    pub fn check_remove(
        actor_id: Uuid,
        actor: Option<Role>,
        target_id: Uuid,
        target: Role,
    ) -> Result<(), AuthorityError> {
        if actor_id == target_id {
            return Err(AuthorityError::bad_request(
                "Use leave to remove yourself from an organization",
            ));
        }

        if target == Role::Owner {
            return Err(AuthorityError::forbidden("Cannot remove the organization owner"));
        }

        let actor = Self::require_manager(actor)?;
        if actor == Role::Admin && target == Role::Admin {
            return Err(admins_cannot_modify_admins());
        }

        Ok(())
    }

    pub fn check_change_role(
        actor_id: Uuid,
        actor: Option<Role>,
        target_id: Uuid,
        current: Role,
        new_role: Role,
    ) -> Result<(), AuthorityError> {
        if actor_id == target_id {
            return Err(AuthorityError::bad_request("You cannot change your own role"));
        }

        if new_role == Role::Owner {
            return Err(ownership_by_transfer_only());
        }

        if current == Role::Owner {
            return Err(AuthorityError::forbidden(
                "Cannot change the organization owner's role",
            ));
        }

        let actor = Self::require_manager(actor)?;
        if actor == Role::Admin {
            if current == Role::Admin {
                return Err(admins_cannot_modify_admins());
            }
            if new_role < current {
                return Err(AuthorityError::forbidden("Admins cannot demote members"));
            }
        }

        if current == new_role {
            return Err(AuthorityError::bad_request(format!(
                "Member already has the {} role",
                new_role
            )));
        }

        Ok(())
    }

    pub fn check_transfer(
        actor_id: Uuid,
        actor: Option<Role>,
        target_id: Uuid,
        target: Option<Role>,
    ) -> Result<(), AuthorityError> {
        if actor_id == target_id {
            return Err(AuthorityError::bad_request(
                "Cannot transfer ownership to yourself",
            ));
        }

        if actor != Some(Role::Owner) {
            return Err(AuthorityError::forbidden("Only the owner can transfer ownership"));
        }

        if target.is_none() {
            return Err(AuthorityError::not_found(
                "Target user is not a member of this organization",
            ));
        }

        Ok(())
    }

    pub fn check_leave(role: Option<Role>) -> Result<(), AuthorityError> {
        match role {
            None => Err(not_a_member()),
            Some(Role::Owner) => Err(AuthorityError::bad_request(
                "The owner cannot leave; transfer ownership first",
            )),
            Some(_) => Ok(()),
        }
    }

    fn require_manager(actor: Option<Role>) -> Result<Role, AuthorityError> {
        match actor {
            None => Err(not_a_member()),
            Some(role) if role.can_manage_members() => Ok(role),
            Some(_) => Err(AuthorityError::forbidden(
                "Only owners and admins can manage members",
            )),
        }
    }
}

fn not_a_member() -> AuthorityError {
    AuthorityError::forbidden("You are not a member of this organization")
}

fn ownership_by_transfer_only() -> AuthorityError {
    AuthorityError::bad_request("Ownership can only be assigned by transfer")
}

fn admins_cannot_modify_admins() -> AuthorityError {
    AuthorityError::forbidden("Admins cannot modify other admins")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ErrorKind;

    fn kind(result: Result<(), AuthorityError>) -> Option<ErrorKind> {
        result.err().map(|e| e.kind())
    }

    #[test]
    fn test_nobody_assigns_owner_directly() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(
            kind(MembershipPolicy::check_add(Some(Role::Owner), Role::Owner)),
            Some(ErrorKind::BadRequest)
        );
        assert_eq!(
            kind(MembershipPolicy::check_change_role(
                a,
                Some(Role::Owner),
                b,
                Role::Admin,
                Role::Owner
            )),
            Some(ErrorKind::BadRequest)
        );
    }

    #[test]
    fn test_owner_cannot_be_removed_or_changed() {
        let (admin, owner) = (Uuid::new_v4(), Uuid::new_v4());

        let err = MembershipPolicy::check_remove(admin, Some(Role::Admin), owner, Role::Owner)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.to_string(), "Cannot remove the organization owner");

        assert_eq!(
            kind(MembershipPolicy::check_change_role(
                admin,
                Some(Role::Admin),
                owner,
                Role::Owner,
                Role::Member
            )),
            Some(ErrorKind::Forbidden)
        );
    }

    #[test]
    fn test_admin_powers() {
        let (admin, other) = (Uuid::new_v4(), Uuid::new_v4());

        // Admin may promote a member
        assert!(MembershipPolicy::check_change_role(
            admin,
            Some(Role::Admin),
            other,
            Role::Member,
            Role::Admin
        )
        .is_ok());

        // ...but may not touch another admin
        assert_eq!(
            kind(MembershipPolicy::check_change_role(
                admin,
                Some(Role::Admin),
                other,
                Role::Admin,
                Role::Member
            )),
            Some(ErrorKind::Forbidden)
        );
        assert_eq!(
            kind(MembershipPolicy::check_remove(admin, Some(Role::Admin), other, Role::Admin)),
            Some(ErrorKind::Forbidden)
        );

        // Admin may remove a member and add admins
        assert!(MembershipPolicy::check_remove(admin, Some(Role::Admin), other, Role::Member).is_ok());
        assert!(MembershipPolicy::check_add(Some(Role::Admin), Role::Admin).is_ok());
    }

    #[test]
    fn test_owner_powers() {
        let (owner, other) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(MembershipPolicy::check_change_role(
            owner,
            Some(Role::Owner),
            other,
            Role::Admin,
            Role::Member
        )
        .is_ok());
        assert!(MembershipPolicy::check_remove(owner, Some(Role::Owner), other, Role::Admin).is_ok());
    }

    #[test]
    fn test_members_and_strangers_cannot_manage() {
        let (actor, other) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(
            kind(MembershipPolicy::check_remove(actor, Some(Role::Member), other, Role::Member)),
            Some(ErrorKind::Forbidden)
        );
        assert_eq!(
            kind(MembershipPolicy::check_invite(None)),
            Some(ErrorKind::Forbidden)
        );
        assert_eq!(
            kind(MembershipPolicy::check_add(Some(Role::Member), Role::Member)),
            Some(ErrorKind::Forbidden)
        );
    }

    #[test]
    fn test_self_targeting_is_bad_request() {
        let me = Uuid::new_v4();

        assert_eq!(
            kind(MembershipPolicy::check_remove(me, Some(Role::Owner), me, Role::Owner)),
            Some(ErrorKind::BadRequest)
        );
        assert_eq!(
            kind(MembershipPolicy::check_change_role(
                me,
                Some(Role::Admin),
                me,
                Role::Admin,
                Role::Member
            )),
            Some(ErrorKind::BadRequest)
        );
        assert_eq!(
            kind(MembershipPolicy::check_transfer(me, Some(Role::Owner), me, Some(Role::Owner))),
            Some(ErrorKind::BadRequest)
        );
    }

    #[test]
    fn test_same_role_is_bad_request() {
        let (owner, other) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(
            kind(MembershipPolicy::check_change_role(
                owner,
                Some(Role::Owner),
                other,
                Role::Member,
                Role::Member
            )),
            Some(ErrorKind::BadRequest)
        );
    }

    #[test]
    fn test_transfer_rules() {
        let (owner, admin) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(MembershipPolicy::check_transfer(owner, Some(Role::Owner), admin, Some(Role::Admin)).is_ok());
        assert_eq!(
            kind(MembershipPolicy::check_transfer(admin, Some(Role::Admin), owner, Some(Role::Owner))),
            Some(ErrorKind::Forbidden)
        );
        assert_eq!(
            kind(MembershipPolicy::check_transfer(owner, Some(Role::Owner), admin, None)),
            Some(ErrorKind::NotFound)
        );
    }

    #[test]
    fn test_leave_rules() {
        assert!(MembershipPolicy::check_leave(Some(Role::Member)).is_ok());
        assert!(MembershipPolicy::check_leave(Some(Role::Admin)).is_ok());

        let err = MembershipPolicy::check_leave(Some(Role::Owner)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.to_string().contains("transfer ownership first"));

        assert_eq!(
            kind(MembershipPolicy::check_leave(None)),
            Some(ErrorKind::Forbidden)
        );
    }
}
