//! # Postgres Order Store
//!
//! Expects a table shaped like:
//!
//! ```sql
//! CREATE TABLE orders (
//!     id       UUID PRIMARY KEY,
//!     customer TEXT NOT NULL,
//!     items    TEXT[] NOT NULL,
//!     status   TEXT NOT NULL
//! );
//! ```
//!
//! Creating and migrating it is the deployment's job.

use crate::model::{Order, OrderId, OrderStatus};
use crate::store::{OrderStore, StoreError, Upserted};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

// The conflict branch only fires when the stored status ranks lower than the
// incoming one. `xmax = 0` is true for a freshly inserted row.
const UPSERT_SQL: &str = "INSERT INTO orders (id, customer, items, status)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (id) DO UPDATE
        SET customer = EXCLUDED.customer, items = EXCLUDED.items, status = EXCLUDED.status
        WHERE (CASE orders.status
                 WHEN 'received' THEN 0
                 WHEN 'preparing' THEN 1
                 WHEN 'ready' THEN 2
                 WHEN 'delivered' THEN 3
                 ELSE -1
               END) < $5
    RETURNING (xmax = 0) AS inserted";

const SELECT_SQL: &str = "SELECT id, customer, items, status FROM orders WHERE id = $1";

type OrderRow = (Uuid, String, Vec<String>, String);

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(unavailable)?;
        info!("Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Closes the pool; in-flight queries finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn from_row((id, customer, items, status): OrderRow) -> Result<Order, StoreError> {
    let status: OrderStatus = status.parse().map_err(|e: crate::model::ModelError| {
        StoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(Order {
        id: OrderId::from(id),
        customer,
        items,
        status,
    })
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[instrument(skip(self, order), fields(order_id = %order.id, status = %order.status))]
    async fn upsert(&self, order: &Order) -> Result<Upserted, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as(UPSERT_SQL)
            .bind(order.id.as_uuid())
            .bind(&order.customer)
            .bind(&order.items)
            .bind(order.status.as_str())
            .bind(order.status.rank())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(match row {
            Some((true,)) => Upserted::Inserted,
            Some((false,)) => Upserted::Advanced,
            None => Upserted::Unchanged,
        })
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(SELECT_SQL)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        row.map(from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_row() {
        let id = Uuid::new_v4();
        let order = from_row((id, "alice".into(), vec!["tea".into()], "ready".into())).unwrap();
        assert_eq!(order.id, OrderId::from(id));
        assert_eq!(order.status, OrderStatus::Ready);

        let corrupt = from_row((id, "alice".into(), vec![], "lost".into()));
        assert!(matches!(corrupt, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_upsert_sql_ranks_match_model() {
        for status in [
            OrderStatus::Received,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::Delivered,
        ] {
            let arm = format!("WHEN '{}' THEN {}", status.as_str(), status.rank());
            assert!(UPSERT_SQL.contains(&arm), "missing {arm}");
        }
    }
}
