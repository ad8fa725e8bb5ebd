//! # Domain Model
//!
//! Pure data structures shared by every stage: the [`Order`] snapshot and its
//! lifecycle, and the [`Credentials`] used by the register/login flows.

pub mod account;
pub mod order;

pub use account::*;
pub use order::*;

/// Errors raised while building or decoding model values.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Malformed payload: {0}")]
    Malformed(String),
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
