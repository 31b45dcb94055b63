//! Organization and membership handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::org::{
    ChangeRoleRequest, CreateOrganizationRequest, SelectedOrganizationResponse,
    SwitchOrganizationRequest, TransferOwnershipRequest,
};
use crate::middleware::{AnyMember, OwnerOnly, OwnerOrAdmin, RoleAuth, SessionAuth};
use crate::models::{MemberRecord, Membership, Tenant, TenantMembership};
use crate::utils::ValidatedJson;
use crate::AppState;

/// List the caller's active organizations.
///
/// GET /orgs
pub async fn list_organizations(
    State(state): State<AppState>,
    auth: SessionAuth,
) -> Result<Json<Vec<TenantMembership>>, AppError> {
    let tenants = state.accounts.list_organizations(auth.user_id()).await?;
    Ok(Json(tenants))
}

/// Create an organization owned by the caller and select it.
///
/// POST /orgs
#[tracing::instrument(skip_all, fields(user_id = %auth.user_id()))]
pub async fn create_organization(
    State(state): State<AppState>,
    auth: SessionAuth,
    ValidatedJson(req): ValidatedJson<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<Tenant>), AppError> {
    let tenant = state
        .accounts
        .create_organization(auth.user_id(), &req.name)
        .await?;

    state
        .sessions
        .switch_tenant(&auth.token, tenant.tenant_id)
        .await?;

    Ok((StatusCode::CREATED, Json(tenant)))
}

/// Select another organization for the current session.
///
/// POST /orgs/switch
#[tracing::instrument(skip_all, fields(user_id = %auth.user_id(), tenant_id = %req.tenant_id))]
pub async fn switch_organization(
    State(state): State<AppState>,
    auth: SessionAuth,
    Json(req): Json<SwitchOrganizationRequest>,
) -> Result<Json<SelectedOrganizationResponse>, AppError> {
    let session = state.sessions.switch_tenant(&auth.token, req.tenant_id).await?;

    Ok(Json(SelectedOrganizationResponse {
        tenant_id: session.tenant_id,
    }))
}

/// Leave the selected organization. Every session of the caller that had
/// it selected moves to another organization.
///
/// POST /orgs/current/leave
#[tracing::instrument(skip_all, fields(user_id = %auth.user_id()))]
pub async fn leave_organization(
    State(state): State<AppState>,
    auth: SessionAuth,
) -> Result<Json<SelectedOrganizationResponse>, AppError> {
    let tenant_id = auth.require_tenant()?;

    state.memberships.leave(auth.user_id(), tenant_id).await?;
    let next = state
        .sessions
        .reselect_after_departure(auth.user_id(), tenant_id)
        .await?;

    Ok(Json(SelectedOrganizationResponse { tenant_id: next }))
}

/// Deactivate the selected organization.
///
/// DELETE /orgs/current
#[tracing::instrument(skip_all, fields(tenant_id = %auth.tenant_id))]
pub async fn deactivate_organization(
    State(state): State<AppState>,
    auth: RoleAuth<OwnerOnly>,
) -> Result<StatusCode, AppError> {
    state
        .accounts
        .deactivate_organization(auth.user_id(), auth.tenant_id)
        .await?;
    state
        .sessions
        .reselect_after_deactivation(auth.tenant_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /orgs/current/members
pub async fn list_members(
    State(state): State<AppState>,
    auth: RoleAuth<AnyMember>,
) -> Result<Json<Vec<MemberRecord>>, AppError> {
    let members = state.memberships.list_members(auth.tenant_id).await?;
    Ok(Json(members))
}

/// PATCH /orgs/current/members/:user_id
#[tracing::instrument(skip_all, fields(tenant_id = %auth.tenant_id, target_user_id = %user_id))]
pub async fn change_member_role(
    State(state): State<AppState>,
    auth: RoleAuth<OwnerOrAdmin>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<Json<Membership>, AppError> {
    let membership = state
        .memberships
        .change_role(auth.user_id(), auth.tenant_id, user_id, req.role)
        .await?;

    Ok(Json(membership))
}

/// DELETE /orgs/current/members/:user_id
#[tracing::instrument(skip_all, fields(tenant_id = %auth.tenant_id, target_user_id = %user_id))]
pub async fn remove_member(
    State(state): State<AppState>,
    auth: RoleAuth<OwnerOrAdmin>,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .memberships
        .remove_member(auth.user_id(), auth.tenant_id, user_id)
        .await?;
    state
        .sessions
        .reselect_after_departure(user_id, auth.tenant_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Hand ownership to another member. The caller becomes an admin.
///
/// POST /orgs/current/transfer
#[tracing::instrument(skip_all, fields(tenant_id = %auth.tenant_id, target_user_id = %req.user_id))]
pub async fn transfer_ownership(
    State(state): State<AppState>,
    auth: RoleAuth<OwnerOnly>,
    Json(req): Json<TransferOwnershipRequest>,
) -> Result<StatusCode, AppError> {
    state
        .memberships
        .transfer_ownership(auth.tenant_id, auth.user_id(), req.user_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
