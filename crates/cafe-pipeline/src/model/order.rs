//! # Order
//!
//! The order snapshot that travels through the pipeline, its identifier and
//! its status lifecycle.
//!
//! # Actor Framework
//! [`Order`] implements [`ActorEntity`](cafe_actor::ActorEntity) so the
//! in-memory order store can hold it in a [`ResourceActor`](cafe_actor::ResourceActor).
//! Its merge rule is the no-regress rule: a put only lands when it moves the
//! status forward.

use crate::model::ModelError;
use cafe_actor::{ActorEntity, Applied};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Type-safe identifier for Orders. Assigned once, at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// A fresh random (v4) identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for OrderId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ModelError::InvalidRequest(format!("not an order id: {s:?}")))
    }
}

/// Where an order is in its lifecycle.
///
/// Variant order is the lifecycle order, so `Ord` compares by progress:
/// `Received < Preparing < Ready < Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Received,
    Preparing,
    Ready,
    Delivered,
}

impl OrderStatus {
    /// Position in the lifecycle, starting at 0.
    pub fn rank(self) -> i16 {
        match self {
            Self::Received => 0,
            Self::Preparing => 1,
            Self::Ready => 2,
            Self::Delivered => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Delivered => "delivered",
        }
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "preparing" => Ok(Self::Preparing),
            "ready" => Ok(Self::Ready),
            "delivered" => Ok(Self::Delivered),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// Payload for placing a new order, as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer: String,
    pub items: Vec<String>,
}

impl NewOrder {
    /// Rejects a blank customer, an empty item list, or a blank item.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.customer.trim().is_empty() {
            return Err(ModelError::InvalidRequest("customer is required".into()));
        }
        if self.items.is_empty() {
            return Err(ModelError::InvalidRequest(
                "an order needs at least one item".into(),
            ));
        }
        if let Some(pos) = self.items.iter().position(|item| item.trim().is_empty()) {
            return Err(ModelError::InvalidRequest(format!("item {pos} is blank")));
        }
        Ok(())
    }
}

/// Full snapshot of an order. Every event on the bus carries one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer: String,
    pub items: Vec<String>,
    pub status: OrderStatus,
}

impl Order {
    /// Creates a `received` order with a fresh id. Validates first.
    pub fn place(params: NewOrder) -> Result<Self, ModelError> {
        params.validate()?;
        Ok(Self {
            id: OrderId::generate(),
            customer: params.customer,
            items: params.items,
            status: OrderStatus::Received,
        })
    }

    /// The same snapshot at `status`, or unchanged if it is already further along.
    pub fn advanced_to(mut self, status: OrderStatus) -> Self {
        self.status = self.status.max(status);
        self
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, ModelError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a bus payload. A snapshot with no items or a blank customer is
    /// as malformed as one that is not JSON.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ModelError> {
        let order: Order = serde_json::from_slice(payload)
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        if order.items.is_empty() {
            return Err(ModelError::Malformed(format!("order {} has no items", order.id)));
        }
        if order.customer.trim().is_empty() {
            return Err(ModelError::Malformed(format!(
                "order {} has no customer",
                order.id
            )));
        }
        Ok(order)
    }
}

impl ActorEntity for Order {
    type Id = OrderId;
    type Error = ModelError;

    fn id(&self) -> OrderId {
        self.id
    }

    fn on_replace(&mut self, incoming: Self) -> Result<Applied, ModelError> {
        if incoming.status > self.status {
            *self = incoming;
            Ok(Applied::Replaced)
        } else {
            Ok(Applied::Unchanged)
        }
    }
}
