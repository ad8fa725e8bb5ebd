//! # Pipeline Stages
//!
//! A stage is one lifecycle transition driven by a bus topic:
//!
//! | Stage | Topic | Group | Effect |
//! |-------|-------|-------|--------|
//! | [`Preparation`] | `new_orders` | `kitchen-group` | work, then publish `ready` to `ready_orders` |
//! | [`StatusTracker`] | `ready_orders` | `order-service` | write `ready` to store, then cache |
//! | [`Fulfillment`] | `ready_orders` | `delivery-group` | work, then write `delivered` to store, then cache |
//!
//! A [`StageRunner`] owns one subscription and feeds deliveries to its stage
//! one at a time. Running several runners for one stage spreads the topic's
//! partitions across them.
//!
//! ## Commit rules
//!
//! - processed (or failed for good) → commit and move on
//! - malformed payload → log, commit, move on
//! - cancelled by shutdown → leave uncommitted and stop
//!
//! Shutdown stops the pull loop. A delivery already being handled runs its
//! work and writes to completion; only a retry wait (a store or bus outage)
//! is cut short by the token. The in-process bus does not survive a restart,
//! so a message left uncommitted then is lost with it.
//!
//! A bad order never stops a runner. Neither do bus read errors: the runner
//! backs off and reads again until shutdown.

pub mod fulfillment;
pub mod preparation;
pub mod tracker;
pub mod work;

pub use fulfillment::Fulfillment;
pub use preparation::Preparation;
pub use tracker::StatusTracker;
pub use work::{SimulatedWork, Work, WorkError, WorkPolicy};

use crate::bus::{BusError, Delivery, EventBus, Subscription};
use crate::cache::StatusCache;
use crate::model::{ModelError, Order};
use crate::retry::{retry, Backoff, RetryError};
use crate::store::{OrderStore, StoreError, Upserted};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Cancelled by shutdown")]
    Cancelled,
    #[error(transparent)]
    Work(#[from] WorkError),
    #[error("Publish failed: {0}")]
    Publish(BusError),
    #[error("Store write failed: {0}")]
    Store(StoreError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[async_trait]
pub trait Stage: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn topic(&self) -> &'static str;
    fn group(&self) -> &'static str;

    /// Handles one decoded snapshot. Work and writes run to completion; the
    /// token only cuts short waits between retries.
    async fn process(&self, order: Order, shutdown: &CancellationToken) -> Result<(), StageError>;
}

/// Default read backoff: 1s doubling up to 30s, unbounded.
pub const READ_BACKOFF: Backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));

enum Outcome {
    Commit,
    Abandon,
}

pub struct StageRunner {
    stage: Arc<dyn Stage>,
    bus: Arc<dyn EventBus>,
    shutdown: CancellationToken,
    read_backoff: Backoff,
}

impl StageRunner {
    pub fn new(stage: Arc<dyn Stage>, bus: Arc<dyn EventBus>, shutdown: CancellationToken) -> Self {
        Self {
            stage,
            bus,
            shutdown,
            read_backoff: READ_BACKOFF,
        }
    }

    pub fn with_read_backoff(mut self, backoff: Backoff) -> Self {
        self.read_backoff = backoff;
        self
    }

    /// Subscribes, then processes deliveries until shutdown.
    pub async fn run(self) {
        let name = self.stage.name();
        let topic = self.stage.topic();
        let group = self.stage.group();

        let subscribed = retry(
            "subscribe",
            &self.read_backoff,
            Some(&self.shutdown),
            |_: &BusError| true,
            || self.bus.subscribe(topic, group),
        )
        .await;
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(RetryError::Cancelled) => return,
            Err(RetryError::Failed(e)) => {
                error!(stage = name, topic, error = %e, "Could not subscribe");
                return;
            }
        };
        info!(stage = name, topic, group, "Stage runner started");

        let mut read_failures = 0u32;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = subscription.next() => next,
            };

            let delivery = match next {
                Ok(delivery) => {
                    read_failures = 0;
                    delivery
                }
                Err(e) => {
                    read_failures += 1;
                    let delay = self.read_backoff.delay(read_failures);
                    warn!(
                        stage = name,
                        topic,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Bus read failed, backing off"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            let span = info_span!(
                "delivery",
                stage = name,
                order_id = %delivery.key,
                partition = delivery.partition,
                offset = delivery.offset
            );
            match self.handle(&delivery).instrument(span).await {
                Outcome::Commit => self.commit(subscription.as_mut(), &delivery).await,
                Outcome::Abandon => break,
            }
        }

        subscription.close().await;
        info!(stage = name, "Stage runner stopped");
    }

    async fn handle(&self, delivery: &Delivery) -> Outcome {
        let order = match Order::from_payload(&delivery.payload) {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "Skipping malformed payload");
                return Outcome::Commit;
            }
        };

        match self.stage.process(order, &self.shutdown).await {
            Ok(()) => Outcome::Commit,
            Err(StageError::Cancelled) => {
                warn!("Shutdown while waiting to retry; message left uncommitted");
                Outcome::Abandon
            }
            Err(e) => {
                error!(error = %e, "Processing failed; message skipped");
                Outcome::Commit
            }
        }
    }

    async fn commit(&self, subscription: &mut dyn Subscription, delivery: &Delivery) {
        if let Err(e) = subscription.commit(delivery).await {
            // The delivery will be seen again by whoever owns the partition now.
            warn!(
                stage = self.stage.name(),
                partition = delivery.partition,
                offset = delivery.offset,
                error = %e,
                "Commit failed"
            );
        }
    }
}

/// Store first (authoritative, bounded retries), then cache (best effort).
/// A store failure skips the cache so the cache never runs ahead of the store,
/// and a stale event refreshes the cache from the stored row instead.
pub(crate) async fn write_through(
    store: &dyn OrderStore,
    cache: &dyn StatusCache,
    store_backoff: &Backoff,
    order: &Order,
    shutdown: &CancellationToken,
) -> Result<Upserted, StageError> {
    let upserted = retry(
        "store upsert",
        store_backoff,
        Some(shutdown),
        |_: &StoreError| true,
        || store.upsert(order),
    )
    .await
    .map_err(|e| match e {
        RetryError::Cancelled => StageError::Cancelled,
        RetryError::Failed(e) => StageError::Store(e),
    })?;

    // A row already further along means this event is stale: cache what the
    // store holds, never the incoming snapshot.
    let current = match upserted {
        Upserted::Unchanged => match store.get(&order.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(upserted),
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Store re-read failed; cache left alone");
                return Ok(upserted);
            }
        },
        Upserted::Inserted | Upserted::Advanced => order.clone(),
    };

    if let Err(e) = cache.put(&current).await {
        warn!(order_id = %order.id, error = %e, "Cache write failed; store is authoritative");
    }
    Ok(upserted)
}
