//! # HTTP Ingress
//!
//! Thin axum surface over [`Intake`], [`StatusQuery`] and [`AuthGate`]:
//!
//! | Route | Success |
//! |-------|---------|
//! | `POST /order` | `201` + `received` snapshot |
//! | `GET /order/status?id=` | `200` + latest snapshot |
//! | `POST /register` | `201` |
//! | `POST /login` | `200 {token}` + `access_token` cookie |
//! | `GET /health` | `200` |
//!
//! The order token is read from `Authorization` (raw or `Bearer`), falling
//! back to the `access_token` cookie.

use crate::authority::{AuthGate, GateError};
use crate::intake::{Intake, IntakeError};
use crate::lifecycle::CafeSystem;
use crate::model::{Credentials, NewOrder, Order, TokenGrant};
use crate::query::{QueryError, StatusQuery};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

pub const TOKEN_COOKIE: &str = "access_token";
const TOKEN_COOKIE_MAX_AGE_SECS: u64 = 24 * 60 * 60;

#[derive(Clone)]
pub struct AppState {
    pub intake: Intake,
    pub query: StatusQuery,
    pub gate: AuthGate,
}

impl AppState {
    pub fn from_system(system: &CafeSystem) -> Self {
        Self {
            intake: system.intake.clone(),
            query: system.query.clone(),
            gate: system.gate.clone(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/order", post(create_order))
        .route("/order/status", get(order_status))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/health", get(health))
        .with_state(state)
}

/// Error body: `{"error": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        let status = match &e {
            IntakeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            IntakeError::Unauthorized => StatusCode::UNAUTHORIZED,
            IntakeError::AuthorityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IntakeError::PublishFailure(_) | IntakeError::PersistFailure { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        let status = match &e {
            QueryError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::TransientUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

/// Gate errors outside registration: a rejection means bad credentials.
impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        let status = match &e {
            GateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GateError::Rejected(_) => StatusCode::UNAUTHORIZED,
            GateError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

/// `Authorization` first (with or without `Bearer `), then the token cookie.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        let value = value.trim();
        let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let token = bearer_token(&headers);
    let order = state.intake.submit(request, token.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    id: Option<String>,
}

async fn order_status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Result<Json<Order>, ApiError> {
    let id = params
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "id is required"))?;
    Ok(Json(state.query.status(id.trim()).await?))
}

async fn register(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<StatusCode, ApiError> {
    match state.gate.register(&credentials).await {
        Ok(()) => Ok(StatusCode::CREATED),
        Err(GateError::Rejected(reason)) => Err(ApiError::new(StatusCode::CONFLICT, reason)),
        Err(e) => Err(e.into()),
    }
}

async fn login(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Response, ApiError> {
    let token = state.gate.login(&credentials).await?;
    let cookie = format!(
        "{TOKEN_COOKIE}={token}; HttpOnly; Path=/; Max-Age={TOKEN_COOKIE_MAX_AGE_SECS}"
    );
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(TokenGrant { token }),
    )
        .into_response())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
