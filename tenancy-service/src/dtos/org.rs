use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{ApiKeyResponse, InvitationRole, Role};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 1, max = 100, message = "Organization name must be 1-100 characters"))]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SwitchOrganizationRequest {
    pub tenant_id: Uuid,
}

/// Tenant selected by the session after a switch or departure.
#[derive(Debug, Serialize)]
pub struct SelectedOrganizationResponse {
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct TransferOwnershipRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvitationRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub role: InvitationRole,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssueApiKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Key name must be 1-100 characters"))]
    pub name: Option<String>,
    pub expiry_utc: Option<DateTime<Utc>>,
}

/// The plaintext key is only ever returned here.
#[derive(Debug, Serialize)]
pub struct IssueApiKeyResponse {
    #[serde(flatten)]
    pub api_key: ApiKeyResponse,
    pub key: String,
}
