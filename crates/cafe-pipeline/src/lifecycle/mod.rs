//! # System Lifecycle & Orchestration
//!
//! Individual stages are simple; wiring them to the same backends and
//! stopping them in the right order is where the care goes.
//!
//! **Key Responsibilities:**
//! 1. **Backend selection** - [`Backends::connect`] picks Postgres, Redis and a
//!    remote authority when configured, in-process implementations otherwise
//! 2. **Wiring** - [`CafeSystem::start`] builds intake, query and the stages over those backends
//! 3. **Graceful Shutdown** - [`CafeSystem::shutdown`] drains, then releases connections
//!
//! ## Graceful Shutdown
//!
//! 1. **Cancel the token** - runners stop pulling new messages
//! 2. **Drain** - a message already taken finishes its work and its writes
//! 3. **Abort stragglers** - after the grace period
//! 4. **Drop backends** - bus, store, cache and authority handles go last
//!
//! The bus is in-process and starts empty on every run, so the grace period
//! should cover the longest work step: a message aborted mid-work is gone.

pub mod backends;
pub mod cafe_system;

pub use backends::*;
pub use cafe_system::*;
