//! API key management and the machine-facing endpoint.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::org::{IssueApiKeyRequest, IssueApiKeyResponse};
use crate::middleware::{OwnerOrAdmin, RequestContext, RoleAuth, TenantKeyAuth};
use crate::models::ApiKeyResponse;
use crate::utils::ValidatedJson;
use crate::AppState;

/// GET /orgs/current/api-keys
pub async fn list_api_keys(
    State(state): State<AppState>,
    auth: RoleAuth<OwnerOrAdmin>,
) -> Result<Json<Vec<ApiKeyResponse>>, AppError> {
    let keys = state.api_keys.list(auth.tenant_id).await?;
    Ok(Json(keys))
}

/// POST /orgs/current/api-keys
#[tracing::instrument(skip_all, fields(tenant_id = %auth.tenant_id))]
pub async fn issue_api_key(
    State(state): State<AppState>,
    auth: RoleAuth<OwnerOrAdmin>,
    ValidatedJson(req): ValidatedJson<IssueApiKeyRequest>,
) -> Result<(StatusCode, Json<IssueApiKeyResponse>), AppError> {
    let (api_key, key) = state
        .api_keys
        .issue(auth.user_id(), auth.tenant_id, req.name, req.expiry_utc)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssueApiKeyResponse {
            api_key: ApiKeyResponse::from(&api_key),
            key,
        }),
    ))
}

/// DELETE /orgs/current/api-keys/:api_key_id
#[tracing::instrument(skip_all, fields(tenant_id = %auth.tenant_id, api_key_id = %api_key_id))]
pub async fn revoke_api_key(
    State(state): State<AppState>,
    auth: RoleAuth<OwnerOrAdmin>,
    Path(api_key_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .api_keys
        .revoke(auth.user_id(), auth.tenant_id, api_key_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Describe the calling machine credential.
///
/// GET /api/whoami
pub async fn whoami(auth: TenantKeyAuth) -> Json<RequestContext> {
    Json(auth.context())
}
