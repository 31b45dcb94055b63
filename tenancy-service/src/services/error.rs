use service_core::error::AppError;
use thiserror::Error;

use crate::models::InvitationStatus;

/// Coarse classification every authority failure maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    BadRequest,
    /// Store failure that may succeed when retried by the caller.
    Transient,
    Internal,
}

#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invitation not found")]
    InvitationNotFound,

    #[error("This invitation has already been {}", .0.as_str())]
    InvitationNotPending(InvitationStatus),

    #[error("This invitation has expired")]
    InvitationExpired,

    #[error("This invitation was sent to a different email address")]
    InvitationEmailMismatch,

    #[error("You are already a member of this organization")]
    AlreadyMember,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthorityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthorityError::Unauthorized(_) | AuthorityError::InvalidCredentials => {
                ErrorKind::Unauthorized
            }
            AuthorityError::Forbidden(_) | AuthorityError::InvitationEmailMismatch => {
                ErrorKind::Forbidden
            }
            AuthorityError::NotFound(_) | AuthorityError::InvitationNotFound => ErrorKind::NotFound,
            AuthorityError::Conflict(_) | AuthorityError::AlreadyMember => ErrorKind::Conflict,
            AuthorityError::BadRequest(_)
            | AuthorityError::InvitationNotPending(_)
            | AuthorityError::InvitationExpired => ErrorKind::BadRequest,
            AuthorityError::Database(e) if is_transient(e) => ErrorKind::Transient,
            AuthorityError::Database(_) | AuthorityError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn unauthorized(msg: impl Into<String>) -> Self {
        AuthorityError::Unauthorized(msg.into())
    }

    pub(crate) fn forbidden(msg: impl Into<String>) -> Self {
        AuthorityError::Forbidden(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        AuthorityError::NotFound(msg.into())
    }

    pub(crate) fn conflict(msg: impl Into<String>) -> Self {
        AuthorityError::Conflict(msg.into())
    }

    pub(crate) fn bad_request(msg: impl Into<String>) -> Self {
        AuthorityError::BadRequest(msg.into())
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    )
}

/// True when `err` is a unique-constraint violation on `constraint`.
pub(crate) fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

impl From<AuthorityError> for AppError {
    fn from(err: AuthorityError) -> Self {
        let kind = err.kind();
        match (kind, err) {
            (ErrorKind::Transient, err) => AppError::ServiceUnavailable(anyhow::Error::new(err)),
            (_, AuthorityError::Database(e)) => AppError::DatabaseError(anyhow::Error::new(e)),
            (_, AuthorityError::Internal(e)) => AppError::InternalError(e),
            (ErrorKind::Unauthorized, err) => AppError::Unauthorized(anyhow::anyhow!(err.to_string())),
            (ErrorKind::Forbidden, err) => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            (ErrorKind::NotFound, err) => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            (ErrorKind::Conflict, err) => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            (_, err) => AppError::BadRequest(anyhow::anyhow!(err.to_string())),
        }
    }
}
