//! Session authority.
//!
//! Sessions carry the user's currently selected tenant. Expiry is fixed at
//! creation and never extended by use.

use chrono::Duration;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::{Session, SessionContext, UserSummary};
use crate::services::credentials::{generate_token, hash_token};
use crate::services::AuthorityError;

#[derive(FromRow)]
struct SessionContextRow {
    session_id: Uuid,
    tenant_id: Option<Uuid>,
    expiry_utc: chrono::DateTime<chrono::Utc>,
    user_id: Uuid,
    email: String,
    username: String,
}

#[derive(Clone)]
pub struct SessionAuthority {
    pool: PgPool,
    lifetime: Duration,
}

impl SessionAuthority {
    pub fn new(pool: PgPool, lifetime: Duration) -> Self {
        Self { pool, lifetime }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Create a session and return it with the plaintext token.
    #[tracing::instrument(skip(self))]
    pub async fn create_session(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
    ) -> Result<(Session, String), AuthorityError> {
        let token = generate_token();
        let session = Session::new(user_id, tenant_id, hash_token(&token), self.lifetime);

        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, token_hash, user_id, tenant_id, expiry_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.session_id)
        .bind(&session.token_hash)
        .bind(session.user_id)
        .bind(session.tenant_id)
        .bind(session.expiry_utc)
        .bind(session.created_utc)
        .execute(&self.pool)
        .await?;

        tracing::info!(session_id = %session.session_id, "Session created");
        Ok((session, token))
    }

    /// Resolve a token to its user and selected tenant. The tenant is
    /// returned as stored; membership is checked by the role guard.
    #[tracing::instrument(skip_all)]
    pub async fn validate_session(&self, token: &str) -> Result<SessionContext, AuthorityError> {
        let row: Option<SessionContextRow> = sqlx::query_as(
            r#"
            SELECT s.session_id, s.tenant_id, s.expiry_utc, u.user_id, u.email, u.username
            FROM sessions s
            JOIN users u ON u.user_id = s.user_id
            WHERE s.token_hash = $1 AND s.expiry_utc > now()
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| AuthorityError::unauthorized("Invalid or expired session"))?;

        Ok(SessionContext {
            session_id: row.session_id,
            user: UserSummary {
                user_id: row.user_id,
                email: row.email,
                username: row.username,
            },
            tenant_id: row.tenant_id,
            expiry_utc: row.expiry_utc,
        })
    }

    /// Point the session at `tenant_id`. The token stays the same.
    #[tracing::instrument(skip(self, token))]
    pub async fn switch_tenant(
        &self,
        token: &str,
        tenant_id: Uuid,
    ) -> Result<Session, AuthorityError> {
        let context = self.validate_session(token).await?;

        let is_member: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM memberships m
                JOIN tenants t ON t.tenant_id = m.tenant_id
                WHERE m.tenant_id = $1 AND m.user_id = $2 AND t.active
            )
            "#,
        )
        .bind(tenant_id)
        .bind(context.user.user_id)
        .fetch_one(&self.pool)
        .await?;

        if !is_member {
            return Err(AuthorityError::forbidden(
                "You are not a member of this organization",
            ));
        }

        let session: Session = sqlx::query_as(
            r#"
            UPDATE sessions SET tenant_id = $2
            WHERE session_id = $1
            RETURNING session_id, token_hash, user_id, tenant_id, expiry_utc, created_utc
            "#,
        )
        .bind(context.session_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(session_id = %session.session_id, "Session switched tenant");
        Ok(session)
    }

    #[tracing::instrument(skip_all)]
    pub async fn delete_session(&self, token: &str) -> Result<(), AuthorityError> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_all_sessions_for(&self, user_id: Uuid) -> Result<u64, AuthorityError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Re-point every session of `user_id` that selects `tenant_id` at the
    /// user's earliest-joined remaining active tenant, or at none. Returns the
    /// newly selected tenant.
    #[tracing::instrument(skip(self))]
    pub async fn reselect_after_departure(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<Uuid>, AuthorityError> {
        let mut tx = self.pool.begin().await?;

        let fallback: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT m.tenant_id
            FROM memberships m
            JOIN tenants t ON t.tenant_id = m.tenant_id
            WHERE m.user_id = $1 AND m.tenant_id <> $2 AND t.active
            ORDER BY m.joined_utc, m.tenant_id
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;

        let result = sqlx::query(
            "UPDATE sessions SET tenant_id = $3 WHERE user_id = $1 AND tenant_id = $2",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(fallback)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            sessions = result.rows_affected(),
            fallback_tenant = ?fallback,
            "Sessions reselected after departure"
        );
        Ok(fallback)
    }

    /// Re-point every session selecting `tenant_id`, whoever owns it, at that
    /// user's earliest-joined remaining active tenant, or at none. Used when
    /// the tenant itself goes away. Returns the number of sessions moved.
    #[tracing::instrument(skip(self))]
    pub async fn reselect_after_deactivation(
        &self,
        tenant_id: Uuid,
    ) -> Result<u64, AuthorityError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions s
            SET tenant_id = (
                SELECT m.tenant_id
                FROM memberships m
                JOIN tenants t ON t.tenant_id = m.tenant_id
                WHERE m.user_id = s.user_id AND m.tenant_id <> $1 AND t.active
                ORDER BY m.joined_utc, m.tenant_id
                LIMIT 1
            )
            WHERE s.tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            sessions = result.rows_affected(),
            "Sessions reselected after deactivation"
        );
        Ok(result.rows_affected())
    }

    /// Delete expired rows. Validation never depends on this having run.
    #[tracing::instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<u64, AuthorityError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expiry_utc <= now()")
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            tracing::info!(purged = result.rows_affected(), "Expired sessions purged");
        }
        Ok(result.rows_affected())
    }
}
