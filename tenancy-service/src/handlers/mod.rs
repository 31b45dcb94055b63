//! HTTP handlers for the tenancy service.

pub mod api_key;
pub mod auth;
pub mod invitation;
pub mod org;
