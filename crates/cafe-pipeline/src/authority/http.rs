//! # Remote Authority
//!
//! JSON over HTTP:
//!
//! | Call | Request body | Success |
//! |------|--------------|---------|
//! | `POST {base}/register` | `{username, password, email}` | any 2xx |
//! | `POST {base}/login` | `{username, password}` | `{token}` |
//! | `POST {base}/validate` | `{token}` | `{valid}` |
//!
//! 4xx answers are the authority saying no; transport errors and 5xx are
//! outages.

use crate::authority::{AuthorityError, CredentialAuthority};
use crate::model::{Credentials, TokenGrant};
use async_trait::async_trait;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct ValidateResponse {
    valid: bool,
}

#[derive(Clone)]
pub struct HttpAuthority {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthority {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthorityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthorityError::Unavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, AuthorityError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| AuthorityError::Unavailable(e.to_string()))?;
        debug!(path, status = %response.status(), "Authority replied");
        classify(response).await
    }
}

async fn classify(response: Response) -> Result<Response, AuthorityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let reason = if body.trim().is_empty() {
        status.to_string()
    } else {
        body.trim().to_string()
    };
    if status.is_client_error() {
        Err(AuthorityError::Rejected(reason))
    } else {
        Err(AuthorityError::Unavailable(reason))
    }
}

#[async_trait]
impl CredentialAuthority for HttpAuthority {
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    async fn register(&self, credentials: &Credentials) -> Result<(), AuthorityError> {
        self.post("register", credentials).await?;
        Ok(())
    }

    #[instrument(skip(self, password))]
    async fn login(&self, username: &str, password: &str) -> Result<String, AuthorityError> {
        let grant: TokenGrant = self
            .post("login", &LoginRequest { username, password })
            .await?
            .json()
            .await
            .map_err(|e| AuthorityError::Unavailable(format!("bad login reply: {e}")))?;
        Ok(grant.token)
    }

    async fn validate_token(&self, token: &str) -> Result<bool, AuthorityError> {
        match self.post("validate", &ValidateRequest { token }).await {
            Ok(response) => {
                let reply: ValidateResponse = response
                    .json()
                    .await
                    .map_err(|e| AuthorityError::Unavailable(format!("bad validate reply: {e}")))?;
                Ok(reply.valid)
            }
            // A refused token is an answer, not an outage.
            Err(AuthorityError::Rejected(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for HttpAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuthority")
            .field("base_url", &self.base_url)
            .finish()
    }
}
