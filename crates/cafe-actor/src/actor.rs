//! # Generic Actor Server
//!
//! This module defines the `ResourceActor`, the component that owns a keyed
//! collection of entities. It is the "server" half of the actor model: one Tokio
//! task, one receiver, messages processed strictly in arrival order.

use crate::client::ResourceClient;
use crate::entity::{ActorEntity, Applied};
use crate::error::FrameworkError;
use crate::message::ResourceRequest;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// The generic actor that manages a collection of keyed entities.
///
/// # Architecture Note
/// The actor owns the `store` and the receiving end of the channel. Because
/// every request is handled inside one task, merge rules such as "never lower an
/// order's status" are evaluated against a value nobody else can touch in the
/// meantime. No `Mutex` is involved.
///
/// # Usage Pattern
///
/// 1.  **Create**: `ResourceActor::new()` returns the actor and a client.
/// 2.  **Run**: spawn `actor.run()` on the runtime.
/// 3.  **Use**: clone the client freely; dropping the last clone stops the actor.
///
/// ```rust
/// use cafe_actor::{ActorEntity, Applied, ResourceActor};
///
/// #[derive(Clone, Debug)]
/// struct Counter { key: String, value: u32 }
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("counter error")]
/// struct CounterError;
///
/// impl ActorEntity for Counter {
///     type Id = String;
///     type Error = CounterError;
///
///     fn id(&self) -> String { self.key.clone() }
///
///     fn on_replace(&mut self, incoming: Self) -> Result<Applied, CounterError> {
///         if incoming.value > self.value {
///             self.value = incoming.value;
///             Ok(Applied::Replaced)
///         } else {
///             Ok(Applied::Unchanged)
///         }
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let (actor, client) = ResourceActor::<Counter>::new(10);
///     tokio::spawn(actor.run());
///
///     client.put(Counter { key: "a".into(), value: 2 }).await.unwrap();
///     let applied = client.put(Counter { key: "a".into(), value: 1 }).await.unwrap();
///     assert_eq!(applied, Applied::Unchanged);
/// }
/// ```
pub struct ResourceActor<T: ActorEntity> {
    receiver: mpsc::Receiver<ResourceRequest<T>>,
    store: HashMap<T::Id, T>,
    sweep_interval: Duration,
}

/// How often an actor drops expired entries nobody has read since.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

impl<T: ActorEntity> ResourceActor<T> {
    /// Creates a new `ResourceActor` and its associated `ResourceClient`.
    ///
    /// `buffer_size` is the capacity of the request channel; callers wait when
    /// it is full.
    pub fn new(buffer_size: usize) -> (Self, ResourceClient<T>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            receiver,
            store: HashMap::new(),
            sweep_interval: SWEEP_INTERVAL,
        };
        (actor, ResourceClient::new(sender))
    }

    /// Expired entries are also evicted on read; the sweep catches the rest.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Runs the actor's event loop until every client has been dropped.
    pub async fn run(mut self) {
        // Extract just the type name (e.g., "Order" instead of "cafe_pipeline::model::order::Order")
        let entity_type = std::any::type_name::<T>()
            .split("::")
            .last()
            .unwrap_or("Unknown");
        info!(entity_type, "Actor started");

        let mut sweep = tokio::time::interval(self.sweep_interval.max(Duration::from_millis(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let msg = tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = sweep.tick() => {
                    let swept = self.sweep();
                    if swept > 0 {
                        debug!(entity_type, swept, size = self.store.len(), "Swept expired");
                    }
                    continue;
                }
            };
            match msg {
                ResourceRequest::Put { item, respond_to } => {
                    let id = item.id();
                    let result = self.put(item);
                    match &result {
                        Ok(applied) => debug!(entity_type, %id, ?applied, "Put"),
                        Err(e) => warn!(entity_type, %id, error = %e, "Put rejected"),
                    }
                    let _ = respond_to.send(result);
                }
                ResourceRequest::Get { id, respond_to } => {
                    let item = self.get(&id);
                    debug!(entity_type, %id, found = item.is_some(), "Get");
                    let _ = respond_to.send(Ok(item));
                }
                ResourceRequest::Len { respond_to } => {
                    let _ = respond_to.send(Ok(self.store.len()));
                }
            }
        }

        info!(entity_type, size = self.store.len(), "Shutdown");
    }

    /// Drops every expired entry; returns how many went.
    fn sweep(&mut self) -> usize {
        let before = self.store.len();
        let now = Instant::now();
        self.store.retain(|_, item| !item.is_expired(now));
        before - self.store.len()
    }

    fn put(&mut self, item: T) -> Result<Applied, FrameworkError> {
        let id = item.id();
        let now = Instant::now();
        match self.store.get_mut(&id) {
            Some(current) if !current.is_expired(now) => current
                .on_replace(item)
                .map_err(|e| FrameworkError::EntityError(Box::new(e))),
            _ => {
                self.store.insert(id, item);
                Ok(Applied::Inserted)
            }
        }
    }

    fn get(&mut self, id: &T::Id) -> Option<T> {
        let expired = self.store.get(id)?.is_expired(Instant::now());
        if expired {
            self.store.remove(id);
            return None;
        }
        self.store.get(id).cloned()
    }
}
