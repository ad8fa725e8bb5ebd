//! # ActorEntity Trait
//!
//! The `ActorEntity` trait is the contract a value must satisfy to live inside a
//! [`ResourceActor`](crate::ResourceActor). The actor is a keyed store: callers
//! supply fully formed entities, the actor keys them by [`ActorEntity::id`] and
//! asks the entity itself how a newer value for the same key should be merged.
//!
//! # Provided Methods (Hooks)
//! - [`ActorEntity::on_replace`] - merge rule for a put on an occupied key.
//!   The default overwrites.
//! - [`ActorEntity::is_expired`] - lets an entity carry its own time-to-live.
//!   The default never expires.
//!
//! Both hooks run inside the actor task, so they see a consistent view of the
//! stored value and never race with another put for the same key.

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::time::Instant;

/// Outcome of a put, as decided by the actor and the entity's merge rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The key was vacant (or held an expired entity).
    Inserted,
    /// The stored entity was overwritten.
    Replaced,
    /// The merge rule kept the stored entity as it was.
    Unchanged,
}

/// Trait that any keyed entity must implement to be managed by `ResourceActor`.
///
/// # Per-Actor Error Type
/// Each entity defines one error enum for everything its hooks can reject.
/// The framework boxes it into [`FrameworkError::EntityError`](crate::FrameworkError)
/// so callers can downcast when they need the concrete variant.
pub trait ActorEntity: Clone + Send + Sync + 'static {
    /// The key the actor stores this entity under.
    type Id: Eq + Hash + Clone + Send + Sync + Display + Debug;

    /// The error type returned by the hooks.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Key of this entity. Must be stable across replacements.
    fn id(&self) -> Self::Id;

    /// Called when `incoming` arrives for a key that already holds `self`.
    ///
    /// Return [`Applied::Replaced`] after mutating `self`, [`Applied::Unchanged`]
    /// to keep the stored value, or an error to reject the put.
    fn on_replace(&mut self, incoming: Self) -> Result<Applied, Self::Error> {
        *self = incoming;
        Ok(Applied::Replaced)
    }

    /// Whether this entity should be treated as absent at `now`.
    fn is_expired(&self, _now: Instant) -> bool {
        false
    }
}
