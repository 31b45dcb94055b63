pub mod auth;

pub use auth::{
    authorize_role, AnyMember, OwnerOnly, OwnerOrAdmin, RequestContext, RoleAuth, RolePolicy,
    SessionAuth, TenantKeyAuth,
};
