//! # Cafe Pipeline
//!
//! Order lifecycle across independently running stages connected by an
//! event bus, with a read-optimized status cache over durable storage and a
//! credential authority in front of order intake.
//!
//! ```text
//! POST /order ─▶ Intake ──new_orders──▶ Preparation ──ready_orders──┬─▶ StatusTracker
//!                  │                      (kitchen)                  └─▶ Fulfillment
//!                  └─▶ cache + store                                       (delivery)
//! ```
//!
//! - **[model]**: [`Order`](model::Order), its status machine and wire payload.
//! - **[bus]**: topic/partition/consumer-group event bus contract and the in-process broker.
//! - **[store]** / **[cache]**: durable order records and the TTL'd status cache.
//! - **[authority]**: credential authority adapters and the [`AuthGate`](authority::AuthGate).
//! - **[stage]**: the consuming stages and the [`StageRunner`](stage::StageRunner) loop.
//! - **[intake]** / **[query]**: the synchronous entry points.
//! - **[lifecycle]**: backend selection, startup and graceful shutdown.
//! - **[http]**: the axum ingress.

pub mod authority;
pub mod bus;
pub mod cache;
pub mod config;
pub mod http;
pub mod intake;
pub mod lifecycle;
pub mod model;
pub mod query;
pub mod retry;
pub mod stage;
pub mod store;
