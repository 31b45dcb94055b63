//! Domain models for the tenancy authority.

pub mod api_key;
pub mod invitation;
pub mod membership;
pub mod role;
pub mod session;
pub mod tenant;
pub mod user;

pub use api_key::{ApiKey, ApiKeyContext, ApiKeyResponse};
pub use invitation::{
    is_expired, Invitation, InvitationPreview, InvitationResponse, InvitationStatus,
};
pub use membership::{MemberRecord, Membership};
pub use role::{InvitationRole, Role};
pub use session::{Session, SessionContext};
pub use tenant::{Tenant, TenantMembership};
pub use user::{normalize_email, User, UserResponse, UserSummary};
