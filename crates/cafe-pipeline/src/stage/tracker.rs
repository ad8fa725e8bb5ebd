//! Records prepared orders as `ready` so status queries can see the
//! intermediate state. Also the path by which an order whose intake write
//! failed ends up in the store.

use crate::bus::{ORDER_SERVICE_GROUP, READY_ORDERS};
use crate::cache::StatusCache;
use crate::model::{Order, OrderStatus};
use crate::retry::Backoff;
use crate::stage::fulfillment::STORE_BACKOFF;
use crate::stage::{write_through, Stage, StageError};
use crate::store::{OrderStore, Upserted};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct StatusTracker {
    store: Arc<dyn OrderStore>,
    cache: Arc<dyn StatusCache>,
    store_backoff: Backoff,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<dyn StatusCache>) -> Self {
        Self {
            store,
            cache,
            store_backoff: STORE_BACKOFF,
        }
    }

    pub fn with_store_backoff(mut self, backoff: Backoff) -> Self {
        self.store_backoff = backoff;
        self
    }
}

#[async_trait]
impl Stage for StatusTracker {
    fn name(&self) -> &'static str {
        "status-tracker"
    }

    fn topic(&self) -> &'static str {
        READY_ORDERS
    }

    fn group(&self) -> &'static str {
        ORDER_SERVICE_GROUP
    }

    async fn process(&self, order: Order, shutdown: &CancellationToken) -> Result<(), StageError> {
        let ready = order.advanced_to(OrderStatus::Ready);
        let upserted = write_through(
            self.store.as_ref(),
            self.cache.as_ref(),
            &self.store_backoff,
            &ready,
            shutdown,
        )
        .await?;

        match upserted {
            Upserted::Unchanged => debug!(order_id = %ready.id, "Already at or past ready"),
            _ => info!(order_id = %ready.id, ?upserted, "Order ready"),
        }
        Ok(())
    }
}
