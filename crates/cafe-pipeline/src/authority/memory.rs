//! # In-Process Authority
//!
//! Accounts and sessions each live in their own `ResourceActor`. The account
//! entity refuses replacement, which is how a duplicate username is rejected.
//! Sessions carry their own expiry.

use crate::authority::{AuthorityError, CredentialAuthority};
use crate::model::Credentials;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use cafe_actor::{ActorEntity, Applied, FrameworkError, ResourceActor, ResourceClient};
use std::time::{Duration, Instant};
use tracing::{info, instrument};
use uuid::Uuid;

/// How long an issued token stays valid.
pub const TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("username {0} is already taken")]
    Taken(String),
}

#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl ActorEntity for Account {
    type Id = String;
    type Error = AccountError;

    fn id(&self) -> String {
        self.username.clone()
    }

    fn on_replace(&mut self, incoming: Self) -> Result<Applied, AccountError> {
        Err(AccountError::Taken(incoming.username))
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub expires_at: Instant,
}

impl ActorEntity for Session {
    type Id = String;
    type Error = AccountError;

    fn id(&self) -> String {
        self.token.clone()
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn unavailable(e: FrameworkError) -> AuthorityError {
    AuthorityError::Unavailable(e.to_string())
}

#[derive(Clone)]
pub struct MemoryAuthority {
    accounts: ResourceClient<Account>,
    sessions: ResourceClient<Session>,
    token_ttl: Duration,
}

impl MemoryAuthority {
    pub fn new(
        accounts: ResourceClient<Account>,
        sessions: ResourceClient<Session>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            accounts,
            sessions,
            token_ttl,
        }
    }

    /// Spawns the account and session actors.
    pub fn spawn(token_ttl: Duration) -> Self {
        let (account_actor, accounts) = ResourceActor::<Account>::new(32);
        let (session_actor, sessions) = ResourceActor::<Session>::new(32);
        tokio::spawn(account_actor.run());
        tokio::spawn(session_actor.run());
        Self::new(accounts, sessions, token_ttl)
    }
}

#[async_trait]
impl CredentialAuthority for MemoryAuthority {
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    async fn register(&self, credentials: &Credentials) -> Result<(), AuthorityError> {
        let password = credentials.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthorityError::Unavailable(e.to_string()))?
            .map_err(|e| AuthorityError::Unavailable(format!("password hashing failed: {e}")))?;

        let account = Account {
            username: credentials.username.clone(),
            email: credentials.email.clone(),
            password_hash,
        };
        match self.accounts.put(account).await {
            Ok(_) => {
                info!("Account registered");
                Ok(())
            }
            Err(FrameworkError::EntityError(e)) => Err(AuthorityError::Rejected(e.to_string())),
            Err(e) => Err(unavailable(e)),
        }
    }

    #[instrument(skip(self, password))]
    async fn login(&self, username: &str, password: &str) -> Result<String, AuthorityError> {
        let invalid = || AuthorityError::Rejected("invalid username or password".into());

        let account = self
            .accounts
            .get(username.to_string())
            .await
            .map_err(unavailable)?
            .ok_or_else(invalid)?;

        let password = password.to_string();
        let hash = account.password_hash;
        let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AuthorityError::Unavailable(e.to_string()))?;
        if !verified {
            return Err(invalid());
        }

        let token = Uuid::new_v4().to_string();
        self.sessions
            .put(Session {
                token: token.clone(),
                username: account.username,
                expires_at: Instant::now() + self.token_ttl,
            })
            .await
            .map_err(unavailable)?;
        info!("Session issued");
        Ok(token)
    }

    async fn validate_token(&self, token: &str) -> Result<bool, AuthorityError> {
        let session = self
            .sessions
            .get(token.to_string())
            .await
            .map_err(unavailable)?;
        Ok(session.is_some())
    }
}
