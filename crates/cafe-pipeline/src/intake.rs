//! # Intake
//!
//! Admits new orders into the pipeline:
//!
//! 1. the bearer token must be present and accepted by the authority
//! 2. the order must have a customer and at least one non-blank item
//! 3. a fresh id is assigned and the `received` snapshot published to `new_orders`
//! 4. the snapshot is cached (best effort), then persisted
//!
//! The publish decides acceptance: if it fails, nothing else happens and the
//! caller is told so. A persist failure after a successful publish is reported
//! as a failure too, although the event is already in flight and later stages
//! will write the order through.

use crate::authority::{AuthGate, GateError};
use crate::bus::{BusError, EventBus, Record, NEW_ORDERS};
use crate::cache::StatusCache;
use crate::model::{ModelError, NewOrder, Order, OrderId};
use crate::retry::{retry, Backoff};
use crate::store::OrderStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Credential authority unavailable: {0}")]
    AuthorityUnavailable(String),
    #[error("Order could not be published: {0}")]
    PublishFailure(String),
    #[error("Order {order_id} was published but not persisted: {reason}")]
    PersistFailure { order_id: OrderId, reason: String },
}

/// Default intake publish backoff: three tries, 50ms then 100ms apart.
pub const PUBLISH_BACKOFF: Backoff =
    Backoff::new(Duration::from_millis(50), Duration::from_millis(500)).with_attempts(3);

#[derive(Clone)]
pub struct Intake {
    gate: AuthGate,
    bus: Arc<dyn EventBus>,
    cache: Arc<dyn StatusCache>,
    store: Arc<dyn OrderStore>,
    publish_backoff: Backoff,
}

impl Intake {
    pub fn new(
        gate: AuthGate,
        bus: Arc<dyn EventBus>,
        cache: Arc<dyn StatusCache>,
        store: Arc<dyn OrderStore>,
    ) -> Self {
        Self {
            gate,
            bus,
            cache,
            store,
            publish_backoff: PUBLISH_BACKOFF,
        }
    }

    pub fn with_publish_backoff(mut self, backoff: Backoff) -> Self {
        self.publish_backoff = backoff;
        self
    }

    /// Authorizes, validates and places an order. Returns the `received`
    /// snapshot carrying the assigned id.
    #[instrument(skip_all, fields(customer = %request.customer))]
    pub async fn submit(&self, request: NewOrder, token: Option<&str>) -> Result<Order, IntakeError> {
        self.authorize(token).await?;

        let order = Order::place(request).map_err(|e| match e {
            ModelError::InvalidRequest(reason) => IntakeError::InvalidRequest(reason),
            other => IntakeError::InvalidRequest(other.to_string()),
        })?;
        let payload = order
            .to_payload()
            .map_err(|e| IntakeError::InvalidRequest(e.to_string()))?;

        retry(
            "publish submitted",
            &self.publish_backoff,
            None,
            |_: &BusError| true,
            || {
                self.bus
                    .publish(NEW_ORDERS, Record::new(order.id.to_string(), payload.clone()))
            },
        )
        .await
        .map_err(|e| {
            warn!(order_id = %order.id, error = %e, "Publish failed; order not accepted");
            IntakeError::PublishFailure(e.to_string())
        })?;

        if let Err(e) = self.cache.put(&order).await {
            warn!(order_id = %order.id, error = %e, "Cache write failed; store is authoritative");
        }

        if let Err(e) = self.store.upsert(&order).await {
            error!(
                order_id = %order.id,
                error = %e,
                "Order published but not persisted; later stages will write it through"
            );
            return Err(IntakeError::PersistFailure {
                order_id: order.id,
                reason: e.to_string(),
            });
        }

        info!(order_id = %order.id, items = order.items.len(), "Order received");
        Ok(order)
    }

    async fn authorize(&self, token: Option<&str>) -> Result<(), IntakeError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let Some(token) = token else {
            return Err(IntakeError::Unauthorized);
        };
        match self.gate.validate(token).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(IntakeError::Unauthorized),
            Err(GateError::Unavailable(reason)) => Err(IntakeError::AuthorityUnavailable(reason)),
            Err(GateError::Rejected(_)) | Err(GateError::InvalidRequest(_)) => {
                Err(IntakeError::Unauthorized)
            }
        }
    }
}
