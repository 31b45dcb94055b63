//! Invitation authority.
//!
//! An invitation moves from `pending` to exactly one of `accepted`,
//! `declined` or `revoked`. Expiry is evaluated with [`is_expired`] at the
//! moment of use and never written back.

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::db::TenantExecutor;
use crate::models::{
    is_expired, normalize_email, Invitation, InvitationPreview, InvitationResponse,
    InvitationRole, InvitationStatus, Membership,
};
use crate::services::credentials::{generate_token, hash_token};
use crate::services::memberships::{insert_membership, role_in};
use crate::services::notifications::{AuthorityEvent, EventDispatcher};
use crate::services::policy::MembershipPolicy;
use crate::services::AuthorityError;

const INVITATION_COLUMNS: &str = "invitation_id, tenant_id, email, role_code, token_hash, \
     status_code, invited_by_user_id, expiry_utc, accepted_utc, decided_utc, created_utc";

#[derive(FromRow)]
struct PreviewRow {
    #[sqlx(flatten)]
    invitation: Invitation,
    organization_name: String,
    inviter_name: Option<String>,
}

/// Names needed to word notifications.
#[derive(FromRow)]
struct Parties {
    organization_name: String,
    inviter_name: String,
    inviter_email: String,
}

async fn load_parties(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    inviter_id: Uuid,
) -> Result<Parties, AuthorityError> {
    let parties = sqlx::query_as(
        r#"
        SELECT t.display_name AS organization_name, u.username AS inviter_name, u.email AS inviter_email
        FROM tenants t, users u
        WHERE t.tenant_id = $1 AND u.user_id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(inviter_id)
    .fetch_one(conn)
    .await?;
    Ok(parties)
}

fn parse_status(invitation: &Invitation) -> Result<InvitationStatus, AuthorityError> {
    invitation
        .status()
        .map_err(|e| AuthorityError::Internal(anyhow::anyhow!(e)))
}

/// Status then expiry, the order every transition checks them in.
fn ensure_open(invitation: &Invitation, now: DateTime<Utc>) -> Result<(), AuthorityError> {
    let status = parse_status(invitation)?;
    if status != InvitationStatus::Pending {
        return Err(AuthorityError::InvitationNotPending(status));
    }
    if is_expired(invitation, now) {
        return Err(AuthorityError::InvitationExpired);
    }
    Ok(())
}

async fn user_email(conn: &mut PgConnection, user_id: Uuid) -> Result<String, AuthorityError> {
    let email: Option<String> = sqlx::query_scalar("SELECT email FROM users WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
    email.ok_or_else(|| AuthorityError::unauthorized("Unknown user"))
}

#[derive(Clone)]
pub struct InvitationAuthority {
    executor: TenantExecutor,
    events: EventDispatcher,
    validity: Duration,
}

impl InvitationAuthority {
    pub fn new(executor: TenantExecutor, events: EventDispatcher, validity: Duration) -> Self {
        Self {
            executor,
            events,
            validity,
        }
    }

    /// Invite `email` into `tenant_id`. Returns the invitation and the
    /// plaintext token, which is only ever handed to the notifier.
    #[tracing::instrument(skip(self, email))]
    pub async fn create(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        email: &str,
        role: InvitationRole,
    ) -> Result<(Invitation, String), AuthorityError> {
        let email = normalize_email(email);
        if !email.validate_email() {
            return Err(AuthorityError::bad_request("Invalid email address"));
        }

        let token = generate_token();
        let invitation = Invitation::new(
            tenant_id,
            &email,
            role,
            hash_token(&token),
            actor_id,
            self.validity,
        );

        let (invitation, parties) = self
            .executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    // Serializes invitation creation per tenant
                    let active: Option<bool> = sqlx::query_scalar(
                        "SELECT active FROM tenants WHERE tenant_id = $1 FOR NO KEY UPDATE",
                    )
                    .bind(tenant_id)
                    .fetch_optional(&mut *conn)
                    .await?;

                    if active != Some(true) {
                        return Err(AuthorityError::not_found("Organization not found"));
                    }

                    let actor = role_in(conn, tenant_id, actor_id).await?;
                    MembershipPolicy::check_invite(actor)?;

                    let already_member: bool = sqlx::query_scalar(
                        r#"
                        SELECT EXISTS (
                            SELECT 1 FROM memberships m
                            JOIN users u ON u.user_id = m.user_id
                            WHERE m.tenant_id = $1 AND u.email = $2
                        )
                        "#,
                    )
                    .bind(tenant_id)
                    .bind(&invitation.email)
                    .fetch_one(&mut *conn)
                    .await?;

                    if already_member {
                        return Err(AuthorityError::conflict(
                            "User is already a member of this organization",
                        ));
                    }

                    let outstanding: bool = sqlx::query_scalar(
                        r#"
                        SELECT EXISTS (
                            SELECT 1 FROM invitations
                            WHERE tenant_id = $1 AND email = $2
                              AND status_code = 'pending' AND expiry_utc >= now()
                        )
                        "#,
                    )
                    .bind(tenant_id)
                    .bind(&invitation.email)
                    .fetch_one(&mut *conn)
                    .await?;

                    if outstanding {
                        return Err(AuthorityError::conflict(
                            "A pending invitation already exists for this email",
                        ));
                    }

                    sqlx::query(
                        r#"
                        INSERT INTO invitations (
                            invitation_id, tenant_id, email, role_code, token_hash, status_code,
                            invited_by_user_id, expiry_utc, accepted_utc, decided_utc, created_utc
                        )
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                        "#,
                    )
                    .bind(invitation.invitation_id)
                    .bind(invitation.tenant_id)
                    .bind(&invitation.email)
                    .bind(&invitation.role_code)
                    .bind(&invitation.token_hash)
                    .bind(&invitation.status_code)
                    .bind(invitation.invited_by_user_id)
                    .bind(invitation.expiry_utc)
                    .bind(invitation.accepted_utc)
                    .bind(invitation.decided_utc)
                    .bind(invitation.created_utc)
                    .execute(&mut *conn)
                    .await?;

                    let parties = load_parties(conn, tenant_id, actor_id).await?;
                    Ok((invitation, parties))
                })
            })
            .await?;

        tracing::info!(invitation_id = %invitation.invitation_id, "Invitation created");

        self.events.emit_after_commit(AuthorityEvent::InvitationCreated {
            invitation_id: invitation.invitation_id,
            organization_name: parties.organization_name,
            inviter_name: parties.inviter_name,
            email: invitation.email.clone(),
            role,
            token: token.clone(),
            expiry_utc: invitation.expiry_utc,
        });

        Ok((invitation, token))
    }

    /// Tenant of the invitation behind `token_hash`, if that tenant is active.
    async fn resolve_tenant(&self, token_hash: &str) -> Result<Uuid, AuthorityError> {
        let tenant_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT i.tenant_id
            FROM invitations i
            JOIN tenants t ON t.tenant_id = i.tenant_id
            WHERE i.token_hash = $1 AND t.active
            "#,
        )
        .bind(token_hash)
        .fetch_optional(self.executor.pool())
        .await?;

        tenant_id.ok_or(AuthorityError::InvitationNotFound)
    }

    /// Accept an invitation on behalf of `user_id`.
    ///
    /// The invitation row is locked for the whole transaction, so of two
    /// concurrent accepts exactly one succeeds.
    #[tracing::instrument(skip(self, token))]
    pub async fn accept(&self, token: &str, user_id: Uuid) -> Result<Membership, AuthorityError> {
        let token_hash = hash_token(token);
        let tenant_id = self.resolve_tenant(&token_hash).await?;

        let (membership, invitation, parties, member_name) = self
            .executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    let invitation: Option<Invitation> = sqlx::query_as(&format!(
                        "SELECT {} FROM invitations WHERE token_hash = $1 AND tenant_id = $2 FOR UPDATE",
                        INVITATION_COLUMNS
                    ))
                    .bind(&token_hash)
                    .bind(tenant_id)
                    .fetch_optional(&mut *conn)
                    .await?;

                    let invitation = invitation.ok_or(AuthorityError::InvitationNotFound)?;
                    let now = Utc::now();
                    ensure_open(&invitation, now)?;

                    let email = user_email(conn, user_id).await?;
                    if !invitation.is_addressed_to(&email) {
                        return Err(AuthorityError::InvitationEmailMismatch);
                    }

                    if role_in(conn, tenant_id, user_id).await?.is_some() {
                        return Err(AuthorityError::AlreadyMember);
                    }

                    let role = invitation
                        .role()
                        .map_err(|e| AuthorityError::Internal(anyhow::anyhow!(e)))?;
                    let membership = insert_membership(conn, tenant_id, user_id, role.into()).await?;

                    sqlx::query(
                        r#"
                        UPDATE invitations
                        SET status_code = 'accepted', accepted_utc = $2, decided_utc = $2
                        WHERE invitation_id = $1
                        "#,
                    )
                    .bind(invitation.invitation_id)
                    .bind(now)
                    .execute(&mut *conn)
                    .await?;

                    let parties = load_parties(conn, tenant_id, invitation.invited_by_user_id).await?;
                    let member_name: String =
                        sqlx::query_scalar("SELECT username FROM users WHERE user_id = $1")
                            .bind(user_id)
                            .fetch_one(&mut *conn)
                            .await?;

                    Ok((membership, invitation, parties, member_name))
                })
            })
            .await?;

        tracing::info!(
            invitation_id = %invitation.invitation_id,
            tenant_id = %tenant_id,
            "Invitation accepted"
        );

        self.events.emit_after_commit(AuthorityEvent::InvitationAccepted {
            invitation_id: invitation.invitation_id,
            organization_name: parties.organization_name,
            inviter_email: parties.inviter_email,
            member_name,
        });

        Ok(membership)
    }

    /// Decline an invitation addressed to `user_id`.
    #[tracing::instrument(skip(self, token))]
    pub async fn decline(&self, token: &str, user_id: Uuid) -> Result<(), AuthorityError> {
        let token_hash = hash_token(token);
        let tenant_id = self.resolve_tenant(&token_hash).await?;

        let (invitation, parties) = self
            .executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    let invitation: Option<Invitation> = sqlx::query_as(&format!(
                        "SELECT {} FROM invitations WHERE token_hash = $1 AND tenant_id = $2",
                        INVITATION_COLUMNS
                    ))
                    .bind(&token_hash)
                    .bind(tenant_id)
                    .fetch_optional(&mut *conn)
                    .await?;

                    let invitation = invitation.ok_or(AuthorityError::InvitationNotFound)?;
                    ensure_open(&invitation, Utc::now())?;

                    let email = user_email(conn, user_id).await?;
                    if !invitation.is_addressed_to(&email) {
                        return Err(AuthorityError::InvitationEmailMismatch);
                    }

                    let updated = sqlx::query(
                        r#"
                        UPDATE invitations SET status_code = 'declined', decided_utc = now()
                        WHERE invitation_id = $1 AND status_code = 'pending'
                        "#,
                    )
                    .bind(invitation.invitation_id)
                    .execute(&mut *conn)
                    .await?;

                    if updated.rows_affected() == 0 {
                        // Decided concurrently; report the winning state
                        let code: String = sqlx::query_scalar(
                            "SELECT status_code FROM invitations WHERE invitation_id = $1",
                        )
                        .bind(invitation.invitation_id)
                        .fetch_one(&mut *conn)
                        .await?;
                        let status = code
                            .parse()
                            .map_err(|e: String| AuthorityError::Internal(anyhow::anyhow!(e)))?;
                        return Err(AuthorityError::InvitationNotPending(status));
                    }

                    let parties = load_parties(conn, tenant_id, invitation.invited_by_user_id).await?;
                    Ok((invitation, parties))
                })
            })
            .await?;

        tracing::info!(invitation_id = %invitation.invitation_id, "Invitation declined");

        self.events.emit_after_commit(AuthorityEvent::InvitationDeclined {
            invitation_id: invitation.invitation_id,
            organization_name: parties.organization_name,
            inviter_email: parties.inviter_email,
            email: invitation.email,
        });

        Ok(())
    }

    /// Revoke a pending invitation of `tenant_id`.
    #[tracing::instrument(skip(self))]
    pub async fn revoke(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        invitation_id: Uuid,
    ) -> Result<(), AuthorityError> {
        self.executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    let actor = role_in(conn, tenant_id, actor_id).await?;
                    MembershipPolicy::check_invite(actor)?;

                    let invitation: Option<Invitation> = sqlx::query_as(&format!(
                        "SELECT {} FROM invitations WHERE invitation_id = $1 AND tenant_id = $2 FOR UPDATE",
                        INVITATION_COLUMNS
                    ))
                    .bind(invitation_id)
                    .bind(tenant_id)
                    .fetch_optional(&mut *conn)
                    .await?;

                    let invitation = invitation.ok_or(AuthorityError::InvitationNotFound)?;
                    ensure_open(&invitation, Utc::now())?;

                    sqlx::query(
                        r#"
                        UPDATE invitations SET status_code = 'revoked', decided_utc = now()
                        WHERE invitation_id = $1
                        "#,
                    )
                    .bind(invitation_id)
                    .execute(&mut *conn)
                    .await?;

                    Ok(())
                })
            })
            .await?;

        tracing::info!("Invitation revoked");
        Ok(())
    }

    /// Public, redacted view of an invitation. Unknown tokens and tokens of
    /// inactive organizations look the same.
    #[tracing::instrument(skip_all)]
    pub async fn get_by_token(&self, token: &str) -> Result<InvitationPreview, AuthorityError> {
        let row: Option<PreviewRow> = sqlx::query_as(
            r#"
            SELECT i.*, t.display_name AS organization_name, u.username AS inviter_name
            FROM invitations i
            JOIN tenants t ON t.tenant_id = i.tenant_id
            LEFT JOIN users u ON u.user_id = i.invited_by_user_id
            WHERE i.token_hash = $1 AND t.active
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(self.executor.pool())
        .await?;

        let row = row.ok_or(AuthorityError::InvitationNotFound)?;
        let invitation = &row.invitation;

        Ok(InvitationPreview {
            organization_name: row.organization_name.clone(),
            inviter_name: row
                .inviter_name
                .clone()
                .unwrap_or_else(|| "A former member".to_string()),
            role: invitation
                .role()
                .map_err(|e| AuthorityError::Internal(anyhow::anyhow!(e)))?,
            expiry_utc: invitation.expiry_utc,
            is_expired: is_expired(invitation, Utc::now()),
            status: parse_status(invitation)?,
        })
    }

    /// Pending invitations of a tenant, newest first, flagged when expired.
    #[tracing::instrument(skip(self))]
    pub async fn list_pending(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<InvitationResponse>, AuthorityError> {
        let invitations: Vec<Invitation> = self
            .executor
            .with_tenant_context(tenant_id, move |conn| {
                Box::pin(async move {
                    let rows: Vec<Invitation> = sqlx::query_as(&format!(
                        "SELECT {} FROM invitations WHERE tenant_id = $1 AND status_code = 'pending' ORDER BY created_utc DESC",
                        INVITATION_COLUMNS
                    ))
                    .bind(tenant_id)
                    .fetch_all(conn)
                    .await?;
                    Ok(rows)
                })
            })
            .await?;

        let now = Utc::now();
        Ok(invitations
            .iter()
            .map(|inv| InvitationResponse::from_invitation(inv, now))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(validity: Duration) -> Invitation {
        Invitation::new(
            Uuid::new_v4(),
            "bob@x.com",
            InvitationRole::Member,
            "digest".to_string(),
            Uuid::new_v4(),
            validity,
        )
    }

    #[test]
    fn test_ensure_open_accepts_fresh_pending() {
        let inv = pending(Duration::days(7));
        assert!(ensure_open(&inv, inv.created_utc + Duration::days(1)).is_ok());
    }

    #[test]
    fn test_status_is_checked_before_expiry() {
        let mut inv = pending(Duration::days(7));
        inv.status_code = "accepted".to_string();

        let err = ensure_open(&inv, inv.created_utc + Duration::days(30)).unwrap_err();
        assert_eq!(err.to_string(), "This invitation has already been accepted");
    }

    #[test]
    fn test_expired_pending_is_rejected() {
        let inv = pending(Duration::days(7));
        let err = ensure_open(&inv, inv.created_utc + Duration::days(8)).unwrap_err();
        assert!(matches!(err, AuthorityError::InvitationExpired));
    }
}
