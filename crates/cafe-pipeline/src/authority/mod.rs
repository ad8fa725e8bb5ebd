//! # Credential Authority
//!
//! The pipeline never decides who a user is. It asks a credential authority,
//! through [`AuthGate`], to register accounts, to log users in (yielding an
//! opaque bearer token) and to validate tokens.
//!
//! Two failure domains are kept apart everywhere:
//! [`AuthorityError::Rejected`] (the authority answered "no") and
//! [`AuthorityError::Unavailable`] (no usable answer). Only the latter is retried.
//!
//! - [`HttpAuthority`] - remote authority over HTTP/JSON.
//! - [`MemoryAuthority`] - in-process authority for local runs and tests.

pub mod gate;
pub mod http;
pub mod memory;

pub use gate::{AuthGate, GateError};
pub use http::HttpAuthority;
pub use memory::MemoryAuthority;

use crate::model::Credentials;
use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthorityError {
    #[error("Rejected by credential authority: {0}")]
    Rejected(String),
    #[error("Credential authority unavailable: {0}")]
    Unavailable(String),
}

impl AuthorityError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait]
pub trait CredentialAuthority: Send + Sync {
    async fn register(&self, credentials: &Credentials) -> Result<(), AuthorityError>;

    /// Returns a bearer token for valid credentials.
    async fn login(&self, username: &str, password: &str) -> Result<String, AuthorityError>;

    /// `Ok(false)` for an unknown or expired token; `Err` only when the
    /// authority could not be asked.
    async fn validate_token(&self, token: &str) -> Result<bool, AuthorityError>;
}
