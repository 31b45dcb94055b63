//! Services layer for the tenancy authority.
//!
//! Each authority owns one slice of the membership model and receives its
//! connection pool explicitly through [`TenantExecutor`](crate::db::TenantExecutor).

pub mod accounts;
pub mod api_keys;
pub mod credentials;
pub mod error;
pub mod invitations;
pub mod memberships;
pub mod notifications;
pub mod policy;
pub mod sessions;

pub use accounts::AccountDirectory;
pub use api_keys::ApiKeyAuthority;
pub use credentials::CredentialStore;
pub use error::{AuthorityError, ErrorKind};
pub use invitations::InvitationAuthority;
pub use memberships::MembershipStore;
pub use notifications::{
    AuthorityEvent, EmailNotifier, EventDispatcher, LogNotifier, Notifier, RecordingNotifier,
};
pub use policy::MembershipPolicy;
pub use sessions::SessionAuthority;
