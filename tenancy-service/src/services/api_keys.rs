//! API key authority: machine credentials scoped to one tenant.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::TenantExecutor;
use crate::models::{ApiKey, ApiKeyContext, ApiKeyResponse, Role};
use crate::services::credentials::{
    generate_machine_key, hash_token, key_prefix, CredentialStore, MACHINE_KEY_PREFIX,
};
use crate::services::memberships::role_in;
use crate::services::AuthorityError;

const API_KEY_COLUMNS: &str = "api_key_id, tenant_id, key_name, key_prefix, lookup_hash, \
     secret_hash, active, expiry_utc, created_by_user_id, created_utc";

fn require_key_manager(actor: Option<Role>) -> Result<(), AuthorityError> {
    match actor {
        Some(role) if role.can_manage_members() => Ok(()),
        Some(_) => Err(AuthorityError::forbidden(
            "Only owners and admins can manage API keys",
        )),
        None => Err(AuthorityError::forbidden(
            "You are not a member of this organization",
        )),
    }
}

#[derive(Clone)]
pub struct ApiKeyAuthority {
    executor: TenantExecutor,
    credentials: CredentialStore,
}

impl ApiKeyAuthority {
    pub fn new(executor: TenantExecutor, credentials: CredentialStore) -> Self {
        Self {
            executor,
            credentials,
        }
    }

    /// Issue a key for `tenant_id`. The plaintext is returned once and never
    /// stored.
    #[tracing::instrument(skip(self))]
    pub async fn issue(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        name: Option<String>,
        expiry_utc: Option<DateTime<Utc>>,
    ) -> Result<(ApiKey, String), AuthorityError> {
        if expiry_utc.map_or(false, |expiry| expiry <= Utc::now()) {
            return Err(AuthorityError::bad_request("Expiry must be in the future"));
        }

        let key = generate_machine_key();
        let lookup_hash = hash_token(&key);
        let prefix = key_prefix(&key);
        let secret_hash = self.credentials.hash_secret(&key)?;

        let api_key = self
            .executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    require_key_manager(role_in(conn, tenant_id, actor_id).await?)?;

                    let api_key: ApiKey = sqlx::query_as(&format!(
                        r#"
                        INSERT INTO api_keys (
                            api_key_id, tenant_id, key_name, key_prefix, lookup_hash,
                            secret_hash, active, expiry_utc, created_by_user_id
                        )
                        VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8)
                        RETURNING {}
                        "#,
                        API_KEY_COLUMNS
                    ))
                    .bind(Uuid::new_v4())
                    .bind(tenant_id)
                    .bind(name)
                    .bind(prefix)
                    .bind(lookup_hash)
                    .bind(secret_hash)
                    .bind(expiry_utc)
                    .bind(actor_id)
                    .fetch_one(&mut *conn)
                    .await?;

                    Ok(api_key)
                })
            })
            .await?;

        tracing::info!(api_key_id = %api_key.api_key_id, "API key issued");
        Ok((api_key, key))
    }

    /// Resolve a presented key. Every miss costs one hash verification.
    #[tracing::instrument(skip_all)]
    pub async fn resolve(&self, plaintext: &str) -> Result<Option<ApiKeyContext>, AuthorityError> {
        if !plaintext.starts_with(MACHINE_KEY_PREFIX) {
            self.credentials.dummy_verify(plaintext);
            return Ok(None);
        }

        let api_key: Option<ApiKey> = sqlx::query_as(
            r#"
            SELECT k.api_key_id, k.tenant_id, k.key_name, k.key_prefix, k.lookup_hash,
                   k.secret_hash, k.active, k.expiry_utc, k.created_by_user_id, k.created_utc
            FROM api_keys k
            JOIN tenants t ON t.tenant_id = k.tenant_id
            WHERE k.lookup_hash = $1 AND t.active
            "#,
        )
        .bind(hash_token(plaintext))
        .fetch_optional(self.executor.pool())
        .await?;

        let api_key = match api_key {
            Some(api_key) => api_key,
            None => {
                self.credentials.dummy_verify(plaintext);
                return Ok(None);
            }
        };

        let verified = self.credentials.verify_secret(plaintext, &api_key.secret_hash);
        if !verified || !api_key.is_usable_at(Utc::now()) {
            tracing::warn!(api_key_id = %api_key.api_key_id, "Rejected API key");
            return Ok(None);
        }

        Ok(Some(ApiKeyContext {
            api_key_id: api_key.api_key_id,
            tenant_id: api_key.tenant_id,
            key_name: api_key.key_name,
        }))
    }

    #[tracing::instrument(skip(self))]
    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<ApiKeyResponse>, AuthorityError> {
        let keys: Vec<ApiKey> = self
            .executor
            .with_tenant_context(tenant_id, move |conn| {
                Box::pin(async move {
                    let keys: Vec<ApiKey> = sqlx::query_as(&format!(
                        "SELECT {} FROM api_keys WHERE tenant_id = $1 ORDER BY created_utc DESC",
                        API_KEY_COLUMNS
                    ))
                    .bind(tenant_id)
                    .fetch_all(conn)
                    .await?;
                    Ok(keys)
                })
            })
            .await?;

        Ok(keys.iter().map(ApiKeyResponse::from).collect())
    }

    #[tracing::instrument(skip(self))]
    pub async fn revoke(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        api_key_id: Uuid,
    ) -> Result<(), AuthorityError> {
        self.executor
            .with_tenant_transaction(tenant_id, move |conn| {
                Box::pin(async move {
                    require_key_manager(role_in(conn, tenant_id, actor_id).await?)?;

                    let result = sqlx::query(
                        "UPDATE api_keys SET active = FALSE WHERE api_key_id = $1 AND tenant_id = $2",
                    )
                    .bind(api_key_id)
                    .bind(tenant_id)
                    .execute(&mut *conn)
                    .await?;

                    if result.rows_affected() == 0 {
                        return Err(AuthorityError::not_found("API key not found"));
                    }
                    Ok(())
                })
            })
            .await?;

        tracing::info!("API key revoked");
        Ok(())
    }
}
