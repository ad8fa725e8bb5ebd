//! # Authorization Gate
//!
//! Stateless relay in front of a [`CredentialAuthority`]. It checks that the
//! required fields are present before bothering the authority, and retries
//! outages a bounded number of times. A rejection is returned as is.

use crate::authority::{AuthorityError, CredentialAuthority};
use crate::model::Credentials;
use crate::retry::{retry, Backoff, RetryError};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Credential authority unavailable: {0}")]
    Unavailable(String),
}

impl From<RetryError<AuthorityError>> for GateError {
    fn from(e: RetryError<AuthorityError>) -> Self {
        match e {
            RetryError::Failed(AuthorityError::Rejected(reason)) => Self::Rejected(reason),
            RetryError::Failed(AuthorityError::Unavailable(reason)) => Self::Unavailable(reason),
            RetryError::Cancelled => Self::Unavailable("cancelled".into()),
        }
    }
}

/// Default gate retry: three tries, 100ms then 200ms apart.
pub const GATE_BACKOFF: Backoff =
    Backoff::new(Duration::from_millis(100), Duration::from_secs(1)).with_attempts(3);

#[derive(Clone)]
pub struct AuthGate {
    authority: Arc<dyn CredentialAuthority>,
    backoff: Backoff,
}

fn require(field: &str, value: &str) -> Result<(), GateError> {
    if value.trim().is_empty() {
        return Err(GateError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}

impl AuthGate {
    pub fn new(authority: Arc<dyn CredentialAuthority>) -> Self {
        Self {
            authority,
            backoff: GATE_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn register(&self, credentials: &Credentials) -> Result<(), GateError> {
        require("username", &credentials.username)?;
        require("password", &credentials.password)?;
        require("email", &credentials.email)?;

        retry(
            "register",
            &self.backoff,
            None,
            AuthorityError::is_unavailable,
            || self.authority.register(credentials),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> Result<String, GateError> {
        require("username", &credentials.username)?;
        require("password", &credentials.password)?;

        let token = retry(
            "login",
            &self.backoff,
            None,
            AuthorityError::is_unavailable,
            || self.authority.login(&credentials.username, &credentials.password),
        )
        .await?;
        Ok(token)
    }

    /// `Ok(false)` for a blank, unknown or expired token.
    pub async fn validate(&self, token: &str) -> Result<bool, GateError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(false);
        }
        let valid = retry(
            "validate_token",
            &self.backoff,
            None,
            AuthorityError::is_unavailable,
            || self.authority.validate_token(token),
        )
        .await?;
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `Unavailable` a fixed number of times, then accepts "good".
    struct Flaky {
        outages: AtomicU32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(outages: u32) -> Arc<Self> {
            Arc::new(Self {
                outages: AtomicU32::new(outages),
                calls: AtomicU32::new(0),
            })
        }

        fn outage(&self) -> Result<(), AuthorityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.outages.load(Ordering::SeqCst);
            if left > 0 {
                self.outages.store(left - 1, Ordering::SeqCst);
                return Err(AuthorityError::Unavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CredentialAuthority for Flaky {
        async fn register(&self, _: &Credentials) -> Result<(), AuthorityError> {
            self.outage()?;
            Err(AuthorityError::Rejected("username taken".into()))
        }

        async fn login(&self, _: &str, _: &str) -> Result<String, AuthorityError> {
            self.outage()?;
            Ok("token-1".into())
        }

        async fn validate_token(&self, token: &str) -> Result<bool, AuthorityError> {
            self.outage()?;
            Ok(token == "good")
        }
    }

    fn fast() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(2)).with_attempts(3)
    }

    #[tokio::test]
    async fn test_outages_are_retried() {
        let authority = Flaky::new(2);
        let gate = AuthGate::new(authority.clone()).with_backoff(fast());

        assert!(gate.validate("good").await.unwrap());
        assert_eq!(authority.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sustained_outage_surfaces_unavailable() {
        let gate = AuthGate::new(Flaky::new(10)).with_backoff(fast());
        assert!(matches!(gate.validate("good").await, Err(GateError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let authority = Flaky::new(0);
        let gate = AuthGate::new(authority.clone()).with_backoff(fast());

        let result = gate
            .register(&Credentials::new("alice", "pw").with_email("a@example.com"))
            .await;
        assert!(matches!(result, Err(GateError::Rejected(_))));
        assert_eq!(authority.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_fields_never_reach_authority() {
        let authority = Flaky::new(0);
        let gate = AuthGate::new(authority.clone()).with_backoff(fast());

        let no_email = gate.register(&Credentials::new("alice", "pw")).await;
        assert!(matches!(no_email, Err(GateError::InvalidRequest(_))));
        let no_password = gate.login(&Credentials::new("alice", " ")).await;
        assert!(matches!(no_password, Err(GateError::InvalidRequest(_))));
        assert!(!gate.validate("").await.unwrap());
        assert_eq!(authority.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_returns_token() {
        let gate = AuthGate::new(Flaky::new(1)).with_backoff(fast());
        let token = gate.login(&Credentials::new("alice", "pw")).await.unwrap();
        assert_eq!(token, "token-1");
    }
}
