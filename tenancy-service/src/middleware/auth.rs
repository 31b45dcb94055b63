//! Request guards.
//!
//! Guards are axum extractors. They read credentials from the request,
//! resolve them through the authorities and never write.
//!
//! - [`TenantKeyAuth`]: `Authorization: Bearer tsk_...`, bound to one tenant.
//! - [`SessionAuth`]: session cookie, carrying the user's selected tenant.
//! - [`RoleAuth`]: a session whose selected tenant grants one of the roles
//!   named by its [`RolePolicy`].

use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use service_core::{
    axum::{
        async_trait,
        extract::FromRequestParts,
        http::{header, request::Parts},
    },
    error::AppError,
};
use std::marker::PhantomData;
use uuid::Uuid;

use crate::models::{ApiKeyContext, Role, SessionContext, UserSummary};
use crate::services::AuthorityError;
use crate::AppState;

/// Identity shared by every guard.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub tenant_id: Option<Uuid>,
    pub user: Option<UserSummary>,
    pub session_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    /// Owner or admin of `tenant_id`. Always false for machine credentials.
    pub is_admin: bool,
}

impl RequestContext {
    pub fn for_session(session: &SessionContext, role: Option<Role>) -> Self {
        Self {
            tenant_id: session.tenant_id,
            user: Some(session.user.clone()),
            session_id: Some(session.session_id),
            api_key_id: None,
            is_admin: role.map_or(false, |r| r.can_manage_members()),
        }
    }

    pub fn for_api_key(key: &ApiKeyContext) -> Self {
        Self {
            tenant_id: Some(key.tenant_id),
            user: None,
            session_id: None,
            api_key_id: Some(key.api_key_id),
            is_admin: false,
        }
    }
}

/// Machine caller authenticated by an API key.
#[derive(Debug, Clone)]
pub struct TenantKeyAuth(pub ApiKeyContext);

impl TenantKeyAuth {
    pub fn context(&self) -> RequestContext {
        RequestContext::for_api_key(&self.0)
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for TenantKeyAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

        let key = state
            .api_keys
            .resolve(token)
            .await?
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid API key")))?;

        Ok(TenantKeyAuth(key))
    }
}

/// Interactive caller authenticated by the session cookie.
#[derive(Debug, Clone)]
pub struct SessionAuth {
    pub session: SessionContext,
    /// Plaintext cookie value, needed to switch or end the session.
    pub token: String,
}

impl SessionAuth {
    pub fn user_id(&self) -> Uuid {
        self.session.user.user_id
    }

    /// Selected tenant, or `BadRequest` when none is selected.
    pub fn require_tenant(&self) -> Result<Uuid, AppError> {
        self.session.tenant_id.ok_or_else(no_tenant_selected)
    }
}

fn no_tenant_selected() -> AppError {
    AppError::BadRequest(anyhow::anyhow!("No organization selected"))
}

#[async_trait]
impl FromRequestParts<AppState> for SessionAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(&state.config.session.cookie_name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing session cookie")))?;

        let session = state.sessions.validate_session(&token).await?;

        Ok(SessionAuth { session, token })
    }
}

/// Set of roles a [`RoleAuth`] guard admits.
pub trait RolePolicy: Send + Sync + 'static {
    const ALLOWED: &'static [Role];
}

pub struct OwnerOnly;

impl RolePolicy for OwnerOnly {
    const ALLOWED: &'static [Role] = &[Role::Owner];
}

pub struct OwnerOrAdmin;

impl RolePolicy for OwnerOrAdmin {
    const ALLOWED: &'static [Role] = &[Role::Owner, Role::Admin];
}

pub struct AnyMember;

impl RolePolicy for AnyMember {
    const ALLOWED: &'static [Role] = &[Role::Owner, Role::Admin, Role::Member];
}

/// Decide a role guard from the already-resolved tenant and role.
pub fn authorize_role(
    tenant_id: Option<Uuid>,
    role: Option<Role>,
    allowed: &[Role],
) -> Result<(Uuid, Role), AuthorityError> {
    let tenant_id =
        tenant_id.ok_or_else(|| AuthorityError::bad_request("No organization selected"))?;

    match role {
        None => Err(AuthorityError::forbidden(
            "You are not a member of this organization",
        )),
        Some(role) if allowed.contains(&role) => Ok((tenant_id, role)),
        Some(_) => Err(AuthorityError::forbidden(
            "Insufficient role for this operation",
        )),
    }
}

/// Session caller holding one of `P::ALLOWED` in the selected tenant.
pub struct RoleAuth<P> {
    pub session: SessionAuth,
    pub tenant_id: Uuid,
    pub role: Role,
    _policy: PhantomData<fn() -> P>,
}

impl<P> RoleAuth<P> {
    pub fn user_id(&self) -> Uuid {
        self.session.user_id()
    }

    pub fn context(&self) -> RequestContext {
        RequestContext::for_session(&self.session.session, Some(self.role))
    }
}

#[async_trait]
impl<P: RolePolicy> FromRequestParts<AppState> for RoleAuth<P> {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = SessionAuth::from_request_parts(parts, state).await?;

        let role = match session.session.tenant_id {
            Some(tenant_id) => {
                state
                    .memberships
                    .get_role(session.user_id(), tenant_id)
                    .await?
            }
            None => None,
        };

        let (tenant_id, role) = authorize_role(session.session.tenant_id, role, P::ALLOWED)?;

        Ok(RoleAuth {
            session,
            tenant_id,
            role,
            _policy: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ErrorKind;
    use chrono::Utc;

    #[test]
    fn test_no_tenant_is_bad_request() {
        let err = authorize_role(None, None, AnyMember::ALLOWED).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_non_member_is_forbidden() {
        let err = authorize_role(Some(Uuid::new_v4()), None, AnyMember::ALLOWED).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_role_sets() {
        let tenant = Some(Uuid::new_v4());

        assert!(authorize_role(tenant, Some(Role::Owner), OwnerOnly::ALLOWED).is_ok());
        assert_eq!(
            authorize_role(tenant, Some(Role::Admin), OwnerOnly::ALLOWED)
                .unwrap_err()
                .kind(),
            ErrorKind::Forbidden
        );

        assert!(authorize_role(tenant, Some(Role::Admin), OwnerOrAdmin::ALLOWED).is_ok());
        assert!(authorize_role(tenant, Some(Role::Member), OwnerOrAdmin::ALLOWED).is_err());
        assert!(authorize_role(tenant, Some(Role::Member), AnyMember::ALLOWED).is_ok());
    }

    #[test]
    fn test_context_is_admin() {
        let session = SessionContext {
            session_id: Uuid::new_v4(),
            user: UserSummary {
                user_id: Uuid::new_v4(),
                email: "alice@x.com".to_string(),
                username: "alice".to_string(),
            },
            tenant_id: Some(Uuid::new_v4()),
            expiry_utc: Utc::now(),
        };

        assert!(RequestContext::for_session(&session, Some(Role::Owner)).is_admin);
        assert!(RequestContext::for_session(&session, Some(Role::Admin)).is_admin);
        assert!(!RequestContext::for_session(&session, Some(Role::Member)).is_admin);
        assert!(!RequestContext::for_session(&session, None).is_admin);

        let key = ApiKeyContext {
            api_key_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            key_name: None,
        };
        let context = RequestContext::for_api_key(&key);
        assert!(!context.is_admin);
        assert_eq!(context.tenant_id, Some(key.tenant_id));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let (parts, _) = service_core::axum::http::Request::builder()
            .header(header::AUTHORIZATION, "Bearer tsk_abc")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("tsk_abc"));

        let (parts, _) = service_core::axum::http::Request::builder()
            .header(header::AUTHORIZATION, "Basic abc")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), None);
    }
}
