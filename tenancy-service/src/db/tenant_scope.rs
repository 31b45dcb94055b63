//! Tenant-scoped execution.
//!
//! Row-level security policies read the tenant from the Postgres setting
//! [`TENANT_SETTING`]. Pooled connections are reused across unrelated
//! requests, so a binding must never outlive the unit of work that set it:
//!
//! - [`TenantExecutor::with_tenant_context`] binds the tenant for the session,
//!   runs the work, resets the setting and probes that it reads empty.
//! - [`TenantExecutor::with_tenant_transaction`] binds the tenant with
//!   `is_local = true` inside a transaction, so commit or rollback clears it;
//!   the same probe runs afterwards.
//!
//! Any connection whose binding cannot be verified as cleared is detached from
//! the pool and closed instead of being returned. If the calling future is
//! dropped before its own reset runs, [`release_unbound`] repeats the reset
//! when the pool takes the connection back, and closes it on failure.

use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, Postgres};
use sqlx::Connection;
use uuid::Uuid;

use crate::services::AuthorityError;

/// Setting consulted by the row-level security policies.
pub const TENANT_SETTING: &str = "app.current_tenant_id";

/// Runs caller-supplied work on a pooled connection bound to one tenant.
#[derive(Clone)]
pub struct TenantExecutor {
    pool: PgPool,
}

impl TenantExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool, for statements that are not
    /// tenant-scoped (users, sessions).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `work` with `tenant_id` bound to the connection's session.
    ///
    /// Prefer [`with_tenant_transaction`](Self::with_tenant_transaction) for
    /// writes.
    #[tracing::instrument(skip(self, work), fields(tenant_id = %tenant_id))]
    pub async fn with_tenant_context<T, F>(
        &self,
        tenant_id: Uuid,
        work: F,
    ) -> Result<T, AuthorityError>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, AuthorityError>>,
    {
        let mut conn = self.pool.acquire().await?;

        if let Err(e) = bind_tenant(&mut conn, tenant_id, false).await {
            discard(conn, "tenant binding failed").await;
            return Err(e.into());
        }

        let outcome = work(&mut conn).await;

        match reset_binding(&mut conn).await {
            Ok(None) => {}
            Ok(Some(stale)) => {
                tracing::error!(stale_tenant = %stale, "Tenant binding survived reset");
                discard(conn, "tenant binding survived reset").await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reset tenant binding");
                discard(conn, "tenant binding reset failed").await;
            }
        }

        outcome
    }

    /// Run `work` inside a transaction with `tenant_id` bound
    /// transaction-locally. Commits when `work` returns `Ok`, rolls back
    /// otherwise.
    #[tracing::instrument(skip(self, work), fields(tenant_id = %tenant_id))]
    pub async fn with_tenant_transaction<T, F>(
        &self,
        tenant_id: Uuid,
        work: F,
    ) -> Result<T, AuthorityError>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, AuthorityError>>,
    {
        let mut conn = self.pool.acquire().await?;

        let (outcome, finished_cleanly) = run_transaction(&mut conn, tenant_id, work).await;

        if !finished_cleanly {
            discard(conn, "transaction did not finish cleanly").await;
            return outcome;
        }

        match probe_binding(&mut conn).await {
            Ok(None) => {}
            Ok(Some(stale)) => {
                tracing::error!(stale_tenant = %stale, "Transaction-local tenant binding leaked");
                discard(conn, "tenant binding leaked past transaction").await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to probe tenant binding");
                discard(conn, "tenant binding probe failed").await;
            }
        }

        outcome
    }
}

/// Returns the outcome of `work` and whether the transaction ended with an
/// explicit, successful commit or rollback.
async fn run_transaction<T, F>(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    work: F,
) -> (Result<T, AuthorityError>, bool)
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, AuthorityError>>,
{
    let mut tx = match conn.begin().await {
        Ok(tx) => tx,
        Err(e) => return (Err(e.into()), false),
    };

    if let Err(e) = bind_tenant(&mut tx, tenant_id, true).await {
        return (Err(e.into()), false);
    }

    match work(&mut tx).await {
        Ok(value) => match tx.commit().await {
            Ok(()) => (Ok(value), true),
            Err(e) => (Err(e.into()), false),
        },
        Err(err) => match tx.rollback().await {
            Ok(()) => (Err(err), true),
            Err(e) => {
                tracing::warn!(error = %e, "Rollback failed");
                (Err(err), false)
            }
        },
    }
}

async fn bind_tenant(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    transaction_local: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT set_config($1, $2, $3)")
        .bind(TENANT_SETTING)
        .bind(tenant_id.to_string())
        .bind(transaction_local)
        .execute(conn)
        .await?;
    Ok(())
}

/// Reset the session-level binding and return whatever is still visible.
async fn reset_binding(conn: &mut PgConnection) -> Result<Option<String>, sqlx::Error> {
    sqlx::query("SELECT set_config($1, '', false)")
        .bind(TENANT_SETTING)
        .execute(&mut *conn)
        .await?;
    probe_binding(conn).await
}

/// Pool `after_release` hook. `Ok(false)` makes the pool close the
/// connection instead of reusing it.
pub fn release_unbound(conn: &mut PgConnection) -> BoxFuture<'_, Result<bool, sqlx::Error>> {
    Box::pin(async move {
        match reset_binding(conn).await {
            Ok(None) => Ok(true),
            Ok(Some(stale)) => {
                tracing::error!(stale_tenant = %stale, "Tenant binding survived release reset");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to reset tenant binding on release");
                Ok(false)
            }
        }
    })
}

/// Read the tenant currently bound to `conn`, if any.
pub async fn probe_binding(conn: &mut PgConnection) -> Result<Option<String>, sqlx::Error> {
    let value: Option<String> = sqlx::query_scalar("SELECT current_setting($1, true)")
        .bind(TENANT_SETTING)
        .fetch_one(conn)
        .await?;
    Ok(value.filter(|v| !v.is_empty()))
}

/// Remove `conn` from the pool permanently.
async fn discard(conn: PoolConnection<Postgres>, reason: &'static str) {
    tracing::warn!(reason, "Discarding pooled connection");
    let raw = conn.detach();
    if let Err(e) = raw.close().await {
        tracing::warn!(error = %e, "Failed to close discarded connection");
    }
}
