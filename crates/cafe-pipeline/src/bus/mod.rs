//! # Event Bus
//!
//! The partitioned, at-least-once publish/subscribe contract between stages.
//!
//! - Every record is keyed by order id; records with the same key land in the
//!   same partition and are delivered in publish order.
//! - Consumers subscribe under a group name. Each partition of a topic is
//!   owned by exactly one live member of a group at a time, and ownership
//!   moves when members join or leave.
//! - A delivery is consumed only once it is committed. Anything fetched but not
//!   committed when ownership moves is delivered again.
//!
//! Stages only see the [`EventBus`] and [`Subscription`] traits. [`MemoryBus`]
//! is the in-process implementation.

pub mod memory;

pub use memory::{BusBroker, MemoryBus};

use async_trait::async_trait;

/// Topic carrying "submitted" snapshots, written by intake.
pub const NEW_ORDERS: &str = "new_orders";
/// Topic carrying "prepared" snapshots, written by preparation.
pub const READY_ORDERS: &str = "ready_orders";

/// Consumer group of the preparation stage.
pub const KITCHEN_GROUP: &str = "kitchen-group";
/// Consumer group of the fulfillment stage.
pub const DELIVERY_GROUP: &str = "delivery-group";
/// Consumer group of the status tracker.
pub const ORDER_SERVICE_GROUP: &str = "order-service";

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

/// A record handed to a subscriber, with the coordinates needed to commit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    /// Group generation the delivery was fetched under.
    pub generation: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus closed")]
    Closed,
    #[error("Group {group} on {topic} rebalanced; commit refused")]
    Rebalanced { topic: String, group: String },
    #[error("Member {0} is not part of the group")]
    UnknownMember(u64),
    #[error("Bus unavailable: {0}")]
    Unavailable(String),
}

/// Producer side and subscription factory.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends `record` to `topic`. Returns once the record is durable on the bus.
    async fn publish(&self, topic: &str, record: Record) -> Result<(), BusError>;

    /// Joins `group` on `topic`. Committed offsets are shared by every member
    /// of the group; a new group starts from the earliest record.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BusError>;
}

/// One member of a consumer group.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next delivery from any partition this member owns.
    ///
    /// Cancel-safe in the sense the runner needs: dropping the future loses at
    /// most an uncommitted delivery, which the group hands out again after the
    /// member leaves.
    async fn next(&mut self) -> Result<Delivery, BusError>;

    /// Marks `delivery` (and everything before it in its partition) consumed.
    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BusError>;

    /// Leaves the group so its partitions move to the remaining members.
    async fn close(self: Box<Self>);
}
