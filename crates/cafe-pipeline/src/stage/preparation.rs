//! Kitchen stage: consumes submitted orders, prepares them, publishes them as
//! `ready`. The publish is retried until it lands (or shutdown), so a
//! submitted order is never committed without its prepared event.

use crate::bus::{BusError, EventBus, Record, KITCHEN_GROUP, NEW_ORDERS, READY_ORDERS};
use crate::model::{Order, OrderStatus};
use crate::retry::{retry, Backoff, RetryError};
use crate::stage::{Stage, StageError, Work, WorkPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Default publish backoff: 200ms doubling up to 10s, until success.
pub const PUBLISH_BACKOFF: Backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(10));

pub struct Preparation {
    bus: Arc<dyn EventBus>,
    work: Arc<dyn Work>,
    policy: WorkPolicy,
    publish_backoff: Backoff,
}

impl Preparation {
    pub fn new(bus: Arc<dyn EventBus>, work: Arc<dyn Work>, policy: WorkPolicy) -> Self {
        Self {
            bus,
            work,
            policy,
            publish_backoff: PUBLISH_BACKOFF,
        }
    }

    pub fn with_publish_backoff(mut self, backoff: Backoff) -> Self {
        self.publish_backoff = backoff;
        self
    }
}

#[async_trait]
impl Stage for Preparation {
    fn name(&self) -> &'static str {
        "preparation"
    }

    fn topic(&self) -> &'static str {
        NEW_ORDERS
    }

    fn group(&self) -> &'static str {
        KITCHEN_GROUP
    }

    async fn process(&self, order: Order, shutdown: &CancellationToken) -> Result<(), StageError> {
        info!(order_id = %order.id, "Preparing order");
        self.policy.run(self.work.as_ref(), &order).await?;

        let prepared = order.advanced_to(OrderStatus::Ready);
        let payload = prepared.to_payload()?;
        let key = prepared.id.to_string();

        retry(
            "publish prepared",
            &self.publish_backoff,
            Some(shutdown),
            |_: &BusError| true,
            || self.bus.publish(READY_ORDERS, Record::new(key.clone(), payload.clone())),
        )
        .await
        .map_err(|e| match e {
            RetryError::Cancelled => StageError::Cancelled,
            RetryError::Failed(e) => StageError::Publish(e),
        })?;

        info!(order_id = %prepared.id, status = %prepared.status, "Order prepared");
        Ok(())
    }
}
