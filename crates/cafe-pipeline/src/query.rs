//! # Status Query
//!
//! Cache first, store second. A cache that errors is treated like a cache
//! that missed: the read goes to the store and only a store failure fails the
//! query. A store hit is written back to the cache.

use crate::cache::StatusCache;
use crate::model::{Order, OrderId};
use crate::store::OrderStore;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Order {0} not found")]
    NotFound(OrderId),
    #[error("Order status temporarily unavailable: {0}")]
    TransientUnavailable(String),
}

#[derive(Clone)]
pub struct StatusQuery {
    cache: Arc<dyn StatusCache>,
    store: Arc<dyn OrderStore>,
}

impl StatusQuery {
    pub fn new(cache: Arc<dyn StatusCache>, store: Arc<dyn OrderStore>) -> Self {
        Self { cache, store }
    }

    /// Parses `id` and looks it up.
    pub async fn status(&self, id: &str) -> Result<Order, QueryError> {
        let id: OrderId = id
            .parse()
            .map_err(|e: crate::model::ModelError| QueryError::InvalidRequest(e.to_string()))?;
        self.lookup(&id).await
    }

    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn lookup(&self, id: &OrderId) -> Result<Order, QueryError> {
        match self.cache.get(id).await {
            Ok(Some(order)) => {
                debug!("Served from cache");
                return Ok(order);
            }
            Ok(None) => debug!("Cache miss"),
            Err(e) => warn!(error = %e, "Cache read failed; falling back to store"),
        }

        let order = self
            .store
            .get(id)
            .await
            .map_err(|e| QueryError::TransientUnavailable(e.to_string()))?
            .ok_or(QueryError::NotFound(*id))?;

        if let Err(e) = self.cache.put(&order).await {
            warn!(error = %e, "Cache repopulation failed");
        }
        Ok(order)
    }
}
