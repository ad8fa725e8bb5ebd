//! # Durable Order Store
//!
//! The authoritative record of every order: one row per id. Writes are keyed
//! upserts that only ever move an order's status forward, so redelivered or
//! out-of-order events are harmless.
//!
//! - [`MemoryOrderStore`] - a `ResourceActor<Order>`; used for local runs and tests.
//! - [`PgOrderStore`] - Postgres via `sqlx`.

pub mod memory;
pub mod postgres;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

use crate::model::{Order, OrderId};
use async_trait::async_trait;

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    /// No row existed for the id.
    Inserted,
    /// The row moved to a later status.
    Advanced,
    /// The row was already at this status or later.
    Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Order store unavailable: {0}")]
    Unavailable(String),
    #[error("Stored order {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts the order, or advances the stored row to `order.status` if that
    /// is later than what is stored. Never lowers a status.
    async fn upsert(&self, order: &Order) -> Result<Upserted, StoreError>;

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;
}
