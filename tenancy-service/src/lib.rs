pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{header, HeaderValue, Method, Request},
    middleware::from_fn,
    routing::{delete, get, patch, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::TenancyConfig;
use crate::db::TenantExecutor;
use crate::services::{
    AccountDirectory, ApiKeyAuthority, AuthorityError, CredentialStore, EventDispatcher,
    InvitationAuthority, MembershipStore, Notifier, SessionAuthority,
};

#[derive(Clone)]
pub struct AppState {
    pub config: TenancyConfig,
    pub pool: PgPool,
    pub accounts: AccountDirectory,
    pub sessions: SessionAuthority,
    pub memberships: MembershipStore,
    pub invitations: InvitationAuthority,
    pub api_keys: ApiKeyAuthority,
}

impl AppState {
    /// Wire every authority onto one pool.
    pub fn new(
        config: TenancyConfig,
        pool: PgPool,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AuthorityError> {
        let executor = TenantExecutor::new(pool.clone());
        let credentials = CredentialStore::new(&config.credentials)?;
        let events = EventDispatcher::new(notifier);

        Ok(Self {
            accounts: AccountDirectory::new(executor.clone(), credentials.clone()),
            sessions: SessionAuthority::new(
                pool.clone(),
                chrono::Duration::hours(config.session.expiry_hours),
            ),
            memberships: MembershipStore::new(executor.clone()),
            invitations: InvitationAuthority::new(
                executor.clone(),
                events,
                chrono::Duration::days(config.invitation.expiry_days),
            ),
            api_keys: ApiKeyAuthority::new(executor, credentials),
            config,
            pool,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/signup", post(handlers::auth::signup))
        .route("/auth/signin", post(handlers::auth::signin))
        .route("/auth/signout", post(handlers::auth::signout))
        .route("/auth/me", get(handlers::auth::me));

    let org_routes = Router::new()
        .route(
            "/orgs",
            get(handlers::org::list_organizations).post(handlers::org::create_organization),
        )
        .route("/orgs/switch", post(handlers::org::switch_organization))
        .route("/orgs/current", delete(handlers::org::deactivate_organization))
        .route("/orgs/current/leave", post(handlers::org::leave_organization))
        .route("/orgs/current/transfer", post(handlers::org::transfer_ownership))
        .route("/orgs/current/members", get(handlers::org::list_members))
        .route(
            "/orgs/current/members/:user_id",
            patch(handlers::org::change_member_role).delete(handlers::org::remove_member),
        )
        .route(
            "/orgs/current/invitations",
            get(handlers::invitation::list_invitations)
                .post(handlers::invitation::create_invitation),
        )
        .route(
            "/orgs/current/invitations/:invitation_id",
            delete(handlers::invitation::revoke_invitation),
        )
        .route(
            "/orgs/current/api-keys",
            get(handlers::api_key::list_api_keys).post(handlers::api_key::issue_api_key),
        )
        .route(
            "/orgs/current/api-keys/:api_key_id",
            delete(handlers::api_key::revoke_api_key),
        );

    let invitation_routes = Router::new()
        .route("/invitations/:token", get(handlers::invitation::get_invitation))
        .route(
            "/invitations/:token/accept",
            post(handlers::invitation::accept_invitation),
        )
        .route(
            "/invitations/:token/decline",
            post(handlers::invitation::decline_invitation),
        );

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .security
                .allowed_origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                        None
                    }
                })
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/whoami", get(handlers::api_key::whoami))
        .merge(auth_routes)
        .merge(org_routes)
        .merge(invitation_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
            )
        }))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

/// Service health check
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    db::health_check(&state.pool).await.map_err(|e| {
        tracing::error!(error = %e, "PostgreSQL health check failed");
        AppError::ServiceUnavailable(anyhow::anyhow!(e))
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "postgres": "up"
        }
    })))
}
