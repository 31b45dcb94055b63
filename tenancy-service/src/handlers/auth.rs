//! Account and session handlers.

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;

use crate::config::SessionConfig;
use crate::dtos::auth::{SigninRequest, SigninResponse, SignupRequest, SignupResponse};
use crate::middleware::{RequestContext, SessionAuth};
use crate::utils::ValidatedJson;
use crate::AppState;

/// Session cookie carrying `token`, living as long as the session.
pub(crate) fn session_cookie(config: &SessionConfig, token: String) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(config.expiry_hours))
        .build()
}

fn removal_cookie(config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), "")).path("/").build()
}

/// Register a user with a personal organization and sign them in.
///
/// POST /auth/signup
#[tracing::instrument(skip_all, fields(username = %req.username))]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SignupRequest>,
) -> Result<(StatusCode, CookieJar, Json<SignupResponse>), AppError> {
    let (user, tenant) = state
        .accounts
        .signup(&req.email, &req.username, &req.password)
        .await?;

    let (_, token) = state
        .sessions
        .create_session(user.user_id, Some(tenant.tenant_id))
        .await?;

    let jar = jar.add(session_cookie(&state.config.session, token));

    Ok((
        StatusCode::CREATED,
        jar,
        Json(SignupResponse {
            user: user.sanitized(),
            organization: tenant,
        }),
    ))
}

/// Sign in with email or username. The session selects the user's
/// earliest-joined organization.
///
/// POST /auth/signin
#[tracing::instrument(skip_all)]
pub async fn signin(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SigninRequest>,
) -> Result<(CookieJar, Json<SigninResponse>), AppError> {
    let user = state.accounts.sign_in(&req.identifier, &req.password).await?;

    let tenant_id = state
        .memberships
        .list_tenants_for(user.user_id)
        .await?
        .first()
        .map(|t| t.tenant_id);

    let (_, token) = state.sessions.create_session(user.user_id, tenant_id).await?;

    let jar = jar.add(session_cookie(&state.config.session, token));

    Ok((
        jar,
        Json(SigninResponse {
            user: user.sanitized(),
            tenant_id,
        }),
    ))
}

/// End the current session.
///
/// POST /auth/signout
#[tracing::instrument(skip_all, fields(user_id = %auth.user_id()))]
pub async fn signout(
    State(state): State<AppState>,
    jar: CookieJar,
    auth: SessionAuth,
) -> Result<(StatusCode, CookieJar), AppError> {
    state.sessions.delete_session(&auth.token).await?;

    tracing::info!("Signed out");
    Ok((
        StatusCode::NO_CONTENT,
        jar.remove(removal_cookie(&state.config.session)),
    ))
}

/// Describe the caller.
///
/// GET /auth/me
pub async fn me(
    State(state): State<AppState>,
    auth: SessionAuth,
) -> Result<Json<RequestContext>, AppError> {
    let role = match auth.session.tenant_id {
        Some(tenant_id) => state.memberships.get_role(auth.user_id(), tenant_id).await?,
        None => None,
    };

    Ok(Json(RequestContext::for_session(&auth.session, role)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample_config;

    #[test]
    fn test_session_cookie_attributes() {
        let config = sample_config().session;
        let cookie = session_cookie(&config, "token".to_string());

        assert_eq!(cookie.name(), "tenancy_session");
        assert_eq!(cookie.value(), "token");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(
            cookie.max_age(),
            Some(time::Duration::hours(config.expiry_hours))
        );
    }
}
