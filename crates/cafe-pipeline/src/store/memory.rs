//! # In-Memory Order Store
//!
//! Wraps a `ResourceClient<Order>`. The no-regress rule lives in
//! `Order::on_replace`, so the actor enforces it for every writer.

use crate::model::{Order, OrderId};
use crate::store::{OrderStore, StoreError, Upserted};
use async_trait::async_trait;
use cafe_actor::{ActorClient, Applied, FrameworkError, ResourceActor, ResourceClient};
use tracing::instrument;

/// Order store backed by a `ResourceActor<Order>`.
#[derive(Clone)]
pub struct MemoryOrderStore {
    inner: ResourceClient<Order>,
}

impl MemoryOrderStore {
    pub fn new(inner: ResourceClient<Order>) -> Self {
        Self { inner }
    }

    /// Creates the backing actor, spawns it, and returns the store.
    pub fn spawn() -> Self {
        let (actor, client) = ResourceActor::<Order>::new(64);
        tokio::spawn(actor.run());
        Self::new(client)
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    #[instrument(skip(self, order), fields(order_id = %order.id, status = %order.status))]
    async fn upsert(&self, order: &Order) -> Result<Upserted, StoreError> {
        let applied = self.inner.put(order.clone()).await.map_err(Self::map_error)?;
        Ok(match applied {
            Applied::Inserted => Upserted::Inserted,
            Applied::Replaced => Upserted::Advanced,
            Applied::Unchanged => Upserted::Unchanged,
        })
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        self.fetch(*id).await
    }
}

impl ActorClient<Order> for MemoryOrderStore {
    type Error = StoreError;

    fn inner(&self) -> &ResourceClient<Order> {
        &self.inner
    }

    fn map_error(e: FrameworkError) -> StoreError {
        StoreError::Unavailable(e.to_string())
    }
}
