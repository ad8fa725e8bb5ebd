//! # Cafe Actor
//!
//! Building blocks for keyed, single-owner state in a Tokio application. One
//! [`ResourceActor`] task owns a map of entities; any number of cheap
//! [`ResourceClient`] handles talk to it over a channel. Because all reads and
//! writes for a collection go through one task, merge rules run without locks.
//!
//! The order pipeline uses it for every in-process backend: the order store,
//! the status cache, and the account/session tables of the credential
//! authority.
//!
//! ## Architecture Overview
//!
//! 1. **Entity Layer** ([`ActorEntity`]) - the stored value, its key, its merge rule and TTL
//! 2. **Runtime Layer** ([`ResourceActor`]) - message processing
//! 3. **Interface Layer** ([`ResourceClient`], [`ActorClient`]) - type-safe communication
//!
//! ```rust
//! use cafe_actor::{ActorEntity, Applied, ResourceActor};
//!
//! #[derive(Clone, Debug)]
//! struct Seat { number: u32, guest: String }
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("seat error")]
//! struct SeatError;
//!
//! impl ActorEntity for Seat {
//!     type Id = u32;
//!     type Error = SeatError;
//!     fn id(&self) -> u32 { self.number }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let (actor, client) = ResourceActor::<Seat>::new(10);
//!     tokio::spawn(actor.run());
//!
//!     let applied = client.put(Seat { number: 4, guest: "alice".into() }).await.unwrap();
//!     assert_eq!(applied, Applied::Inserted);
//!
//!     let seat = client.get(4).await.unwrap().unwrap();
//!     assert_eq!(seat.guest, "alice");
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! - Each actor runs in its own Tokio task
//! - Messages are processed **sequentially** within an actor
//! - Multiple actors run in **parallel**
//! - Dropping the last client ends the actor loop
//!
//! ## Testing
//!
//! [`mock::MockClient`] answers a real `ResourceClient` from a queue of
//! expectations, which is how failure paths (a closed store, a rejected put)
//! get exercised in the pipeline's tests.

pub mod actor;
pub mod client;
pub mod client_trait;
pub mod entity;
pub mod error;
pub mod message;
pub mod mock;
pub mod tracing;

// Re-export core types for convenience
pub use actor::ResourceActor;
pub use client::ResourceClient;
pub use client_trait::ActorClient;
pub use entity::{ActorEntity, Applied};
pub use error::FrameworkError;
pub use message::{ResourceRequest, Response};
