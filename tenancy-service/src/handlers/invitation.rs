//! Invitation handlers.
//!
//! Administrators create, list and revoke invitations for the selected
//! organization. Recipients preview an invitation without signing in, then
//! accept or decline it from their own session.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::org::CreateInvitationRequest;
use crate::middleware::{OwnerOrAdmin, RoleAuth, SessionAuth};
use crate::models::{InvitationPreview, InvitationResponse, Membership};
use crate::utils::ValidatedJson;
use crate::AppState;

/// GET /orgs/current/invitations
pub async fn list_invitations(
    State(state): State<AppState>,
    auth: RoleAuth<OwnerOrAdmin>,
) -> Result<Json<Vec<InvitationResponse>>, AppError> {
    let invitations = state.invitations.list_pending(auth.tenant_id).await?;
    Ok(Json(invitations))
}

/// Invite an email address into the selected organization. The token only
/// travels in the notification email.
///
/// POST /orgs/current/invitations
#[tracing::instrument(skip_all, fields(tenant_id = %auth.tenant_id, role = %req.role))]
pub async fn create_invitation(
    State(state): State<AppState>,
    auth: RoleAuth<OwnerOrAdmin>,
    ValidatedJson(req): ValidatedJson<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<InvitationResponse>), AppError> {
    let (invitation, _token) = state
        .invitations
        .create(auth.user_id(), auth.tenant_id, &req.email, req.role)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InvitationResponse::from_invitation(&invitation, Utc::now())),
    ))
}

/// DELETE /orgs/current/invitations/:invitation_id
#[tracing::instrument(skip_all, fields(tenant_id = %auth.tenant_id, invitation_id = %invitation_id))]
pub async fn revoke_invitation(
    State(state): State<AppState>,
    auth: RoleAuth<OwnerOrAdmin>,
    Path(invitation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .invitations
        .revoke(auth.user_id(), auth.tenant_id, invitation_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Public preview of an invitation.
///
/// GET /invitations/:token
#[tracing::instrument(skip_all)]
pub async fn get_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<InvitationPreview>, AppError> {
    let preview = state.invitations.get_by_token(&token).await?;
    Ok(Json(preview))
}

/// Accept an invitation and select the joined organization.
///
/// POST /invitations/:token/accept
#[tracing::instrument(skip_all, fields(user_id = %auth.user_id()))]
pub async fn accept_invitation(
    State(state): State<AppState>,
    auth: SessionAuth,
    Path(token): Path<String>,
) -> Result<Json<Membership>, AppError> {
    let membership = state.invitations.accept(&token, auth.user_id()).await?;

    // The membership is committed; a failed switch only leaves the old
    // selection in place.
    if let Err(e) = state
        .sessions
        .switch_tenant(&auth.token, membership.tenant_id)
        .await
    {
        tracing::warn!(
            error = %e,
            tenant_id = %membership.tenant_id,
            "Failed to select tenant after accepting invitation"
        );
    }

    Ok(Json(membership))
}

/// POST /invitations/:token/decline
#[tracing::instrument(skip_all, fields(user_id = %auth.user_id()))]
pub async fn decline_invitation(
    State(state): State<AppState>,
    auth: SessionAuth,
    Path(token): Path<String>,
) -> Result<StatusCode, AppError> {
    state.invitations.decline(&token, auth.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}
