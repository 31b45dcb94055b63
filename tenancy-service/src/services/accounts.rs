//! Account directory: users, their organizations and password changes.

use sqlx::PgConnection;
use uuid::Uuid;
use validator::ValidateEmail;

use crate::db::TenantExecutor;
use crate::models::{normalize_email, Role, Tenant, TenantMembership, User};
use crate::services::credentials::CredentialStore;
use crate::services::error::is_unique_violation;
use crate::services::memberships::{insert_membership, role_in, MembershipStore};
use crate::services::AuthorityError;
use crate::utils::slug::{next_available_slug, slugify};

const SLUG_CONSTRAINT: &str = "tenants_slug_key";
const USER_UNIQUE_CONSTRAINTS: [&str; 2] = ["users_email_key", "users_username_key"];
const SLUG_ATTEMPTS: usize = 5;

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_ORGANIZATION_NAME_LENGTH: usize = 100;

fn credentials_taken() -> AuthorityError {
    AuthorityError::conflict("Email or username is already taken")
}

/// Usernames are 3-32 characters of `[a-z0-9_-]`.
pub fn validate_username(username: &str) -> Result<(), AuthorityError> {
    let valid_length = (3..=32).contains(&username.len());
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if !valid_length || !valid_chars {
        return Err(AuthorityError::bad_request(
            "Username must be 3-32 characters of lowercase letters, digits, '_' or '-'",
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), AuthorityError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthorityError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

pub fn validate_signup(email: &str, username: &str, password: &str) -> Result<(), AuthorityError> {
    if !email.validate_email() {
        return Err(AuthorityError::bad_request("Invalid email address"));
    }
    validate_username(username)?;
    validate_password(password)
}

/// Trimmed display name, or `BadRequest` when empty or too long.
fn organization_name(name: &str) -> Result<String, AuthorityError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_ORGANIZATION_NAME_LENGTH {
        return Err(AuthorityError::bad_request(format!(
            "Organization name must be 1-{} characters",
            MAX_ORGANIZATION_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}

/// Insert an active tenant with a slug derived from `display_name`, and make
/// `owner_id` its owner.
async fn create_owned_tenant(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    display_name: String,
    owner_id: Uuid,
) -> Result<Tenant, AuthorityError> {
    let base = slugify(&display_name);
    let existing: Vec<String> = sqlx::query_scalar(
        "SELECT slug FROM tenants WHERE slug = $1 OR slug LIKE $1 || '-%'",
    )
    .bind(&base)
    .fetch_all(&mut *conn)
    .await?;

    let tenant = Tenant {
        tenant_id,
        ..Tenant::new(next_available_slug(&base, &existing), display_name)
    };

    sqlx::query(
        r#"
        INSERT INTO tenants (tenant_id, slug, display_name, active, created_utc, updated_utc)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(tenant.tenant_id)
    .bind(&tenant.slug)
    .bind(&tenant.display_name)
    .bind(tenant.active)
    .bind(tenant.created_utc)
    .bind(tenant.updated_utc)
    .execute(&mut *conn)
    .await?;

    insert_membership(conn, tenant.tenant_id, owner_id, Role::Owner).await?;
    Ok(tenant)
}

#[derive(Clone)]
pub struct AccountDirectory {
    executor: TenantExecutor,
    credentials: CredentialStore,
    memberships: MembershipStore,
}

impl AccountDirectory {
    pub fn new(executor: TenantExecutor, credentials: CredentialStore) -> Self {
        Self {
            memberships: MembershipStore::new(executor.clone()),
            executor,
            credentials,
        }
    }

    /// Register a user together with a personal organization they own.
    #[tracing::instrument(skip(self, email, password))]
    pub async fn signup(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<(User, Tenant), AuthorityError> {
        let email = normalize_email(email);
        let username = username.trim().to_lowercase();
        validate_signup(&email, &username, password)?;

        let user = User::new(&email, &username, self.credentials.hash_secret(password)?);
        let display_name = format!("{}'s Organization", user.username);

        for attempt in 1..=SLUG_ATTEMPTS {
            let user = user.clone();
            let display_name = display_name.clone();
            let tenant_id = Uuid::new_v4();

            let result = self
                .executor
                .with_tenant_transaction(tenant_id, move |conn| {
                    Box::pin(async move {
                        let taken: bool = sqlx::query_scalar(
                            "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 OR username = $2)",
                        )
                        .bind(&user.email)
                        .bind(&user.username)
                        .fetch_one(&mut *conn)
                        .await?;

                        if taken {
                            return Err(credentials_taken());
                        }

                        sqlx::query(
                            r#"
                            INSERT INTO users (user_id, email, username, password_hash, email_verified, created_utc, updated_utc)
                            VALUES ($1, $2, $3, $4, $5, $6, $7)
                            "#,
                        )
                        .bind(user.user_id)
                        .bind(&user.email)
                        .bind(&user.username)
                        .bind(&user.password_hash)
                        .bind(user.email_verified)
                        .bind(user.created_utc)
                        .bind(user.updated_utc)
                        .execute(&mut *conn)
                        .await?;

                        let tenant =
                            create_owned_tenant(conn, tenant_id, display_name, user.user_id).await?;
                        Ok((user, tenant))
                    })
                })
                .await;

            match result {
                Ok((user, tenant)) => {
                    tracing::info!(user_id = %user.user_id, tenant_id = %tenant.tenant_id, "User signed up");
                    return Ok((user, tenant));
                }
                Err(AuthorityError::Database(ref e)) if is_unique_violation(e, SLUG_CONSTRAINT) => {
                    tracing::warn!(attempt, "Organization slug taken concurrently, retrying");
                }
                Err(AuthorityError::Database(ref e))
                    if USER_UNIQUE_CONSTRAINTS
                        .iter()
                        .any(|c| is_unique_violation(e, c)) =>
                {
                    return Err(credentials_taken());
                }
                Err(e) => return Err(e),
            }
        }

        Err(AuthorityError::conflict(
            "Could not allocate a unique organization slug",
        ))
    }

    /// Authenticate by email or username. Unknown users and wrong passwords
    /// are indistinguishable.
    #[tracing::instrument(skip_all)]
    pub async fn sign_in(&self, identifier: &str, password: &str) -> Result<User, AuthorityError> {
        let identifier = identifier.trim().to_lowercase();

        let user: Option<User> = sqlx::query_as(
            r#"
            SELECT user_id, email, username, password_hash, email_verified, created_utc, updated_utc
            FROM users
            WHERE email = $1 OR username = $1
            "#,
        )
        .bind(&identifier)
        .fetch_optional(self.executor.pool())
        .await?;

        match user {
            Some(user) if self.credentials.verify_secret(password, &user.password_hash) => {
                tracing::info!(user_id = %user.user_id, "User signed in");
                Ok(user)
            }
            Some(user) => {
                tracing::warn!(user_id = %user.user_id, "Sign-in failed: wrong password");
                Err(AuthorityError::InvalidCredentials)
            }
            None => {
                self.credentials.dummy_verify(password);
                tracing::warn!("Sign-in failed: unknown identifier");
                Err(AuthorityError::InvalidCredentials)
            }
        }
    }

    /// Create an organization owned by `user_id`.
    #[tracing::instrument(skip(self))]
    pub async fn create_organization(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> Result<Tenant, AuthorityError> {
        let display_name = organization_name(name)?;

        for attempt in 1..=SLUG_ATTEMPTS {
            let display_name = display_name.clone();
            let tenant_id = Uuid::new_v4();

            let result = self
                .executor
                .with_tenant_transaction(tenant_id, move |conn| {
                    Box::pin(async move {
                        create_owned_tenant(conn, tenant_id, display_name, user_id).await
                    })
                })
                .await;

            match result {
                Ok(tenant) => {
                    tracing::info!(tenant_id = %tenant.tenant_id, slug = %tenant.slug, "Organization created");
                    return Ok(tenant);
                }
                Err(AuthorityError::Database(ref e)) if is_unique_violation(e, SLUG_CONSTRAINT) => {
                    tracing::warn!(attempt, "Organization slug taken concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AuthorityError::conflict(
            "Could not allocate a unique organization slug",
        ))
    }

    pub async fn list_organizations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<TenantMembership>, AuthorityError> {
        self.memberships.list_tenants_for(user_id).await
    }

    /// Soft-delete an organization. Owner only.
    #[tracing::instrument(skip(self))]
    pub async fn deactivate_organization(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<(), AuthorityError> {
        self.executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    if role_in(conn, tenant_id, actor_id).await? != Some(Role::Owner) {
                        return Err(AuthorityError::forbidden(
                            "Only the owner can delete the organization",
                        ));
                    }

                    sqlx::query(
                        "UPDATE tenants SET active = FALSE, updated_utc = now() WHERE tenant_id = $1",
                    )
                    .bind(tenant_id)
                    .execute(&mut *conn)
                    .await?;
                    Ok(())
                })
            })
            .await?;

        tracing::info!("Organization deactivated");
        Ok(())
    }

    /// Set a new password and end every session of the user, atomically.
    /// Returns the number of sessions ended.
    #[tracing::instrument(skip(self, new_password))]
    pub async fn complete_password_reset(
        &self,
        user_id: Uuid,
        new_password: &str,
    ) -> Result<u64, AuthorityError> {
        validate_password(new_password)?;
        let password_hash = self.credentials.hash_secret(new_password)?;

        let mut tx = self.executor.pool().begin().await?;

        let updated = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_utc = now() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(&password_hash)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AuthorityError::not_found("User not found"));
        }

        let sessions = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(sessions_ended = sessions.rows_affected(), "Password reset completed");
        Ok(sessions.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ErrorKind;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("bob").is_ok());
        assert!(validate_username("bob_the-builder42").is_ok());
        assert!(validate_username("bo").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("Bob").is_err());
        assert!(validate_username("bob smith").is_err());
    }

    #[test]
    fn test_signup_validation() {
        assert!(validate_signup("bob@x.com", "bob", "password1").is_ok());

        let err = validate_signup("not-an-email", "bob", "password1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = validate_signup("bob@x.com", "bob", "short").unwrap_err();
        assert!(err.to_string().contains("at least 8"));
    }

    #[test]
    fn test_organization_name() {
        assert_eq!(organization_name("  Acme  ").unwrap(), "Acme");
        assert!(organization_name("   ").is_err());
        assert!(organization_name(&"x".repeat(101)).is_err());
    }
}
