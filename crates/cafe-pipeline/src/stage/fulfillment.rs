//! Delivery stage: consumes prepared orders, delivers them, and writes the
//! terminal `delivered` state through to the store and the cache.

use crate::bus::{DELIVERY_GROUP, READY_ORDERS};
use crate::cache::StatusCache;
use crate::model::{Order, OrderStatus};
use crate::retry::Backoff;
use crate::stage::{write_through, Stage, StageError, Work, WorkPolicy};
use crate::store::OrderStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Default terminal write backoff: three tries, 200ms then 400ms apart.
pub const STORE_BACKOFF: Backoff =
    Backoff::new(Duration::from_millis(200), Duration::from_secs(2)).with_attempts(3);

pub struct Fulfillment {
    store: Arc<dyn OrderStore>,
    cache: Arc<dyn StatusCache>,
    work: Arc<dyn Work>,
    policy: WorkPolicy,
    store_backoff: Backoff,
}

impl Fulfillment {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<dyn StatusCache>,
        work: Arc<dyn Work>,
        policy: WorkPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            work,
            policy,
            store_backoff: STORE_BACKOFF,
        }
    }

    pub fn with_store_backoff(mut self, backoff: Backoff) -> Self {
        self.store_backoff = backoff;
        self
    }
}

#[async_trait]
impl Stage for Fulfillment {
    fn name(&self) -> &'static str {
        "fulfillment"
    }

    fn topic(&self) -> &'static str {
        READY_ORDERS
    }

    fn group(&self) -> &'static str {
        DELIVERY_GROUP
    }

    async fn process(&self, order: Order, shutdown: &CancellationToken) -> Result<(), StageError> {
        info!(order_id = %order.id, "Delivering order");
        self.policy.run(self.work.as_ref(), &order).await?;

        let delivered = order.advanced_to(OrderStatus::Delivered);
        let upserted = write_through(
            self.store.as_ref(),
            self.cache.as_ref(),
            &self.store_backoff,
            &delivered,
            shutdown,
        )
        .await?;

        info!(order_id = %delivered.id, ?upserted, "Order delivered");
        Ok(())
    }
}
