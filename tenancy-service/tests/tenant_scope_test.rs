mod common;

use common::TestContext;
use std::time::Duration;
use tenancy_service::db::{probe_binding, TenantExecutor};
use tenancy_service::services::AuthorityError;
use uuid::Uuid;

async fn visible_todo_tenants(executor: &TenantExecutor, tenant_id: Uuid) -> Vec<Uuid> {
    executor
        .with_tenant_context(tenant_id, |conn| {
            Box::pin(async move {
                let tenants: Vec<Uuid> = sqlx::query_scalar("SELECT tenant_id FROM todos")
                    .fetch_all(&mut *conn)
                    .await?;
                Ok(tenants)
            })
        })
        .await
        .expect("scoped read")
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_scoped_reads_only_see_the_bound_tenant() {
    // One connection: every call reuses the same physical session.
    let ctx = TestContext::with_pool_size(1).await;
    let (_, tenant_a) = ctx.signup("scopea").await;
    let (_, tenant_b) = ctx.signup("scopeb").await;

    ctx.seed_todo(tenant_a.tenant_id, "a1").await;
    ctx.seed_todo(tenant_a.tenant_id, "a2").await;
    ctx.seed_todo(tenant_b.tenant_id, "b1").await;

    let executor = TenantExecutor::new(ctx.pool.clone());

    let seen_by_b = visible_todo_tenants(&executor, tenant_b.tenant_id).await;
    assert_eq!(seen_by_b, vec![tenant_b.tenant_id]);

    // Same connection that just served B.
    let seen_by_a = visible_todo_tenants(&executor, tenant_a.tenant_id).await;
    assert_eq!(seen_by_a.len(), 2);
    assert!(seen_by_a.iter().all(|t| *t == tenant_a.tenant_id));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_unbound_connection_sees_no_tenant_rows() {
    let ctx = TestContext::with_pool_size(1).await;
    let (_, tenant) = ctx.signup("unbound").await;
    ctx.seed_todo(tenant.tenant_id, "hidden").await;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM todos")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_binding_is_cleared_after_success() {
    let ctx = TestContext::with_pool_size(1).await;
    let (_, tenant) = ctx.signup("hygiene").await;
    let executor = TenantExecutor::new(ctx.pool.clone());

    let bound = executor
        .with_tenant_context(tenant.tenant_id, |conn| {
            Box::pin(async move { Ok(probe_binding(conn).await?) })
        })
        .await
        .unwrap();
    assert_eq!(bound, Some(tenant.tenant_id.to_string()));

    let mut conn = ctx.pool.acquire().await.unwrap();
    assert_eq!(probe_binding(&mut conn).await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_binding_is_cleared_after_failure() {
    let ctx = TestContext::with_pool_size(1).await;
    let (_, tenant) = ctx.signup("failure").await;
    let executor = TenantExecutor::new(ctx.pool.clone());

    let result: Result<(), AuthorityError> = executor
        .with_tenant_context(tenant.tenant_id, |conn| {
            Box::pin(async move {
                sqlx::query("SELECT * FROM no_such_table")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .await;
    assert!(result.is_err());

    let result: Result<(), AuthorityError> = executor
        .with_tenant_transaction(tenant.tenant_id, |_conn| {
            Box::pin(async move { Err(AuthorityError::Forbidden("stop".into())) })
        })
        .await;
    assert!(matches!(result, Err(AuthorityError::Forbidden(_))));

    let mut conn = ctx.pool.acquire().await.unwrap();
    assert_eq!(probe_binding(&mut conn).await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_cancelled_call_does_not_leak_binding() {
    // One connection, so the next acquire gets the connection the
    // cancelled call was holding.
    let ctx = TestContext::with_pool_size(1).await;
    let (_, tenant) = ctx.signup("cancelled").await;
    ctx.seed_todo(tenant.tenant_id, "secret").await;
    let executor = TenantExecutor::new(ctx.pool.clone());

    let timed_out = tokio::time::timeout(
        Duration::from_millis(200),
        executor.with_tenant_context(tenant.tenant_id, |conn| {
            Box::pin(async move {
                sqlx::query("SELECT COUNT(*) FROM todos")
                    .execute(&mut *conn)
                    .await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
        }),
    )
    .await;
    assert!(timed_out.is_err());

    let mut conn = ctx.pool.acquire().await.unwrap();
    assert_eq!(probe_binding(&mut conn).await.unwrap(), None);
    let visible: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM todos")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(visible, 0);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_cancelled_transaction_does_not_leak_binding() {
    let ctx = TestContext::with_pool_size(1).await;
    let (_, tenant) = ctx.signup("abandoned").await;
    let executor = TenantExecutor::new(ctx.pool.clone());
    let tenant_id = tenant.tenant_id;

    let timed_out = tokio::time::timeout(
        Duration::from_millis(200),
        executor.with_tenant_transaction(tenant_id, move |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO todos (todo_id, tenant_id, title) VALUES ($1, $2, 'never')")
                    .bind(Uuid::new_v4())
                    .bind(tenant_id)
                    .execute(&mut *conn)
                    .await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
        }),
    )
    .await;
    assert!(timed_out.is_err());

    let mut conn = ctx.pool.acquire().await.unwrap();
    assert_eq!(probe_binding(&mut conn).await.unwrap(), None);

    let written: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM todos WHERE tenant_id = $1 AND title = 'never'")
            .bind(tenant_id)
            .fetch_one(&ctx.owner_pool)
            .await
            .unwrap();
    assert_eq!(written, 0);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_transaction_rolls_back_on_error() {
    let ctx = TestContext::new().await;
    let (_, tenant) = ctx.signup("rollback").await;
    let executor = TenantExecutor::new(ctx.pool.clone());
    let tenant_id = tenant.tenant_id;

    let result: Result<(), AuthorityError> = executor
        .with_tenant_transaction(tenant_id, move |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO todos (todo_id, tenant_id, title) VALUES ($1, $2, 'x')")
                    .bind(Uuid::new_v4())
                    .bind(tenant_id)
                    .execute(&mut *conn)
                    .await?;
                Err(AuthorityError::Conflict("abort".into()))
            })
        })
        .await;
    assert!(result.is_err());

    assert!(visible_todo_tenants(&executor, tenant_id).await.is_empty());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_writes_for_another_tenant_are_rejected() {
    let ctx = TestContext::new().await;
    let (_, tenant_a) = ctx.signup("writea").await;
    let (_, tenant_b) = ctx.signup("writeb").await;
    let executor = TenantExecutor::new(ctx.pool.clone());
    let other = tenant_b.tenant_id;

    let result: Result<(), AuthorityError> = executor
        .with_tenant_transaction(tenant_a.tenant_id, move |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO todos (todo_id, tenant_id, title) VALUES ($1, $2, 'x')")
                    .bind(Uuid::new_v4())
                    .bind(other)
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .await;

    assert!(matches!(result, Err(AuthorityError::Database(_))));
}
