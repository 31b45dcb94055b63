//! Membership store.
//!
//! Every write runs in a tenant transaction and re-reads the roles involved
//! with `FOR UPDATE` before applying [`MembershipPolicy`].

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::TenantExecutor;
use crate::models::{MemberRecord, Membership, Role, TenantMembership};
use crate::services::policy::MembershipPolicy;
use crate::services::AuthorityError;

#[derive(FromRow)]
struct MembershipRow {
    tenant_id: Uuid,
    user_id: Uuid,
    role_code: String,
    joined_utc: DateTime<Utc>,
}

impl TryFrom<MembershipRow> for Membership {
    type Error = AuthorityError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(Membership {
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            role: parse_role(&row.role_code)?,
            joined_utc: row.joined_utc,
        })
    }
}

#[derive(FromRow)]
struct MemberRow {
    user_id: Uuid,
    username: String,
    email: String,
    role_code: String,
    joined_utc: DateTime<Utc>,
}

#[derive(FromRow)]
struct TenantMembershipRow {
    tenant_id: Uuid,
    slug: String,
    display_name: String,
    role_code: String,
    joined_utc: DateTime<Utc>,
}

pub(crate) fn parse_role(code: &str) -> Result<Role, AuthorityError> {
    code.parse()
        .map_err(|e: String| AuthorityError::Internal(anyhow::anyhow!(e)))
}

/// Role of `user_id` in an active tenant.
pub(crate) async fn role_in(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Role>, AuthorityError> {
    let code: Option<String> = sqlx::query_scalar(
        r#"
        SELECT m.role_code
        FROM memberships m
        JOIN tenants t ON t.tenant_id = m.tenant_id
        WHERE m.tenant_id = $1 AND m.user_id = $2 AND t.active
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;

    code.as_deref().map(parse_role).transpose()
}

/// Lock the membership rows of `user_ids` in an active tenant and return
/// their roles. Rows are locked in user id order.
pub(crate) async fn lock_roles(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_ids: &[Uuid],
) -> Result<HashMap<Uuid, Role>, AuthorityError> {
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT m.user_id, m.role_code
        FROM memberships m
        JOIN tenants t ON t.tenant_id = m.tenant_id
        WHERE m.tenant_id = $1 AND m.user_id = ANY($2) AND t.active
        ORDER BY m.user_id
        FOR UPDATE OF m
        "#,
    )
    .bind(tenant_id)
    .bind(user_ids.to_vec())
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|(user_id, code)| Ok((user_id, parse_role(&code)?)))
        .collect()
}

pub(crate) async fn insert_membership(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
    role: Role,
) -> Result<Membership, AuthorityError> {
    let row: MembershipRow = sqlx::query_as(
        r#"
        INSERT INTO memberships (tenant_id, user_id, role_code)
        VALUES ($1, $2, $3)
        RETURNING tenant_id, user_id, role_code, joined_utc
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(role.as_str())
    .fetch_one(conn)
    .await?;

    row.try_into()
}

async fn set_role(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
    role: Role,
) -> Result<Membership, AuthorityError> {
    let row: MembershipRow = sqlx::query_as(
        r#"
        UPDATE memberships SET role_code = $3
        WHERE tenant_id = $1 AND user_id = $2
        RETURNING tenant_id, user_id, role_code, joined_utc
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(role.as_str())
    .fetch_one(conn)
    .await?;

    row.try_into()
}

async fn delete_membership(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    user_id: Uuid,
) -> Result<(), AuthorityError> {
    sqlx::query("DELETE FROM memberships WHERE tenant_id = $1 AND user_id = $2")
        .bind(tenant_id)
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

fn not_a_member_target() -> AuthorityError {
    AuthorityError::not_found("User is not a member of this organization")
}

#[derive(Clone)]
pub struct MembershipStore {
    executor: TenantExecutor,
}

impl MembershipStore {
    pub fn new(executor: TenantExecutor) -> Self {
        Self { executor }
    }

    /// Role of `user_id` in `tenant_id`, or `None` when the user is not a
    /// member or the tenant is inactive.
    #[tracing::instrument(skip(self))]
    pub async fn get_role(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<Role>, AuthorityError> {
        self.executor
            .with_tenant_context(tenant_id, move |conn| {
                Box::pin(async move { role_in(conn, tenant_id, user_id).await })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<MemberRecord>, AuthorityError> {
        self.executor
            .with_tenant_context(tenant_id, move |conn| {
                Box::pin(async move {
                    let rows: Vec<MemberRow> = sqlx::query_as(
                        r#"
                        SELECT u.user_id, u.username, u.email, m.role_code, m.joined_utc
                        FROM memberships m
                        JOIN users u ON u.user_id = m.user_id
                        WHERE m.tenant_id = $1
                        ORDER BY m.joined_utc, u.username
                        "#,
                    )
                    .bind(tenant_id)
                    .fetch_all(conn)
                    .await?;

                    rows.into_iter()
                        .map(|row| {
                            Ok(MemberRecord {
                                user_id: row.user_id,
                                username: row.username,
                                email: row.email,
                                role: parse_role(&row.role_code)?,
                                joined_utc: row.joined_utc,
                            })
                        })
                        .collect()
                })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_member(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<Membership, AuthorityError> {
        let membership = self
            .executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    let roles = lock_roles(conn, tenant_id, &[actor_id, user_id]).await?;
                    MembershipPolicy::check_add(roles.get(&actor_id).copied(), role)?;

                    if roles.contains_key(&user_id) {
                        return Err(AuthorityError::conflict(
                            "User is already a member of this organization",
                        ));
                    }

                    insert_membership(conn, tenant_id, user_id, role).await
                })
            })
            .await?;

        tracing::info!(role = %membership.role, "Member added");
        Ok(membership)
    }

    /// Remove another member. The caller re-points the departed user's
    /// sessions afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn remove_member(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), AuthorityError> {
        self.executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    let roles = lock_roles(conn, tenant_id, &[actor_id, user_id]).await?;
                    let actor = roles.get(&actor_id).copied();
                    let target = match roles.get(&user_id) {
                        Some(role) => *role,
                        None if actor_id == user_id => actor.unwrap_or(Role::Member),
                        None => {
                            MembershipPolicy::check_invite(actor)?;
                            return Err(not_a_member_target());
                        }
                    };

                    MembershipPolicy::check_remove(actor_id, actor, user_id, target)?;
                    delete_membership(conn, tenant_id, user_id).await
                })
            })
            .await?;

        tracing::info!("Member removed");
        Ok(())
    }

    /// Leave a tenant. The owner must transfer ownership first.
    #[tracing::instrument(skip(self))]
    pub async fn leave(&self, user_id: Uuid, tenant_id: Uuid) -> Result<(), AuthorityError> {
        self.executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    let roles = lock_roles(conn, tenant_id, &[user_id]).await?;
                    MembershipPolicy::check_leave(roles.get(&user_id).copied())?;
                    delete_membership(conn, tenant_id, user_id).await
                })
            })
            .await?;

        tracing::info!("Member left organization");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn change_role(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        new_role: Role,
    ) -> Result<Membership, AuthorityError> {
        let membership = self
            .executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    let roles = lock_roles(conn, tenant_id, &[actor_id, user_id]).await?;
                    let actor = roles.get(&actor_id).copied();
                    let current = match roles.get(&user_id) {
                        Some(role) => *role,
                        None if actor_id == user_id => actor.unwrap_or(Role::Member),
                        None => {
                            MembershipPolicy::check_invite(actor)?;
                            return Err(not_a_member_target());
                        }
                    };

                    MembershipPolicy::check_change_role(actor_id, actor, user_id, current, new_role)?;
                    set_role(conn, tenant_id, user_id, new_role).await
                })
            })
            .await?;

        tracing::info!(role = %membership.role, "Member role changed");
        Ok(membership)
    }

    /// Make `to_user` the owner and demote `from_user` to admin, atomically.
    #[tracing::instrument(skip(self))]
    pub async fn transfer_ownership(
        &self,
        tenant_id: Uuid,
        from_user: Uuid,
        to_user: Uuid,
    ) -> Result<(), AuthorityError> {
        self.executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    let roles = lock_roles(conn, tenant_id, &[from_user, to_user]).await?;
                    MembershipPolicy::check_transfer(
                        from_user,
                        roles.get(&from_user).copied(),
                        to_user,
                        roles.get(&to_user).copied(),
                    )?;

                    // The single-owner index requires the demotion to land first
                    set_role(conn, tenant_id, from_user, Role::Admin).await?;
                    set_role(conn, tenant_id, to_user, Role::Owner).await?;
                    Ok(())
                })
            })
            .await?;

        tracing::info!("Ownership transferred");
        Ok(())
    }

    /// Active tenants of `user_id`, oldest membership first.
    #[tracing::instrument(skip(self))]
    pub async fn list_tenants_for(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<TenantMembership>, AuthorityError> {
        let rows: Vec<TenantMembershipRow> = sqlx::query_as(
            r#"
            SELECT t.tenant_id, t.slug, t.display_name, m.role_code, m.joined_utc
            FROM memberships m
            JOIN tenants t ON t.tenant_id = m.tenant_id
            WHERE m.user_id = $1 AND t.active
            ORDER BY m.joined_utc, t.tenant_id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.executor.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TenantMembership {
                    tenant_id: row.tenant_id,
                    slug: row.slug,
                    display_name: row.display_name,
                    role: parse_role(&row.role_code)?,
                    joined_utc: row.joined_utc,
                })
            })
            .collect()
    }
}
