use crate::cache::{CacheError, StatusCache};
use crate::model::{ModelError, Order, OrderId};
use async_trait::async_trait;
use cafe_actor::actor::SWEEP_INTERVAL;
use cafe_actor::{ActorClient, ActorEntity, Applied, FrameworkError, ResourceActor, ResourceClient};
use std::time::{Duration, Instant};

/// A cached snapshot and the moment it stops being served.
#[derive(Debug, Clone)]
pub struct CachedOrder {
    pub order: Order,
    pub expires_at: Instant,
}

impl ActorEntity for CachedOrder {
    type Id = OrderId;
    type Error = ModelError;

    fn id(&self) -> OrderId {
        self.order.id
    }

    // Same or later status overwrites, which also refreshes the expiry.
    fn on_replace(&mut self, incoming: Self) -> Result<Applied, ModelError> {
        if incoming.order.status < self.order.status {
            return Ok(Applied::Unchanged);
        }
        *self = incoming;
        Ok(Applied::Replaced)
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Status cache backed by a `ResourceActor<CachedOrder>`.
#[derive(Clone)]
pub struct MemoryStatusCache {
    inner: ResourceClient<CachedOrder>,
    ttl: Duration,
}

impl MemoryStatusCache {
    pub fn new(inner: ResourceClient<CachedOrder>, ttl: Duration) -> Self {
        Self { inner, ttl }
    }

    /// Creates the backing actor, spawns it, and returns the cache.
    /// Expired snapshots are swept at most one TTL after they lapse.
    pub fn spawn(ttl: Duration) -> Self {
        let (actor, client) = ResourceActor::<CachedOrder>::new(64);
        tokio::spawn(actor.with_sweep_interval(ttl.min(SWEEP_INTERVAL)).run());
        Self::new(client, ttl)
    }
}

#[async_trait]
impl StatusCache for MemoryStatusCache {
    async fn get(&self, id: &OrderId) -> Result<Option<Order>, CacheError> {
        Ok(self.fetch(*id).await?.map(|cached| cached.order))
    }

    async fn put(&self, order: &Order) -> Result<(), CacheError> {
        let cached = CachedOrder {
            order: order.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        self.inner.put(cached).await.map_err(Self::map_error)?;
        Ok(())
    }
}

impl ActorClient<CachedOrder> for MemoryStatusCache {
    type Error = CacheError;

    fn inner(&self) -> &ResourceClient<CachedOrder> {
        &self.inner
    }

    fn map_error(e: FrameworkError) -> CacheError {
        CacheError::Unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_TTL;
    use crate::model::{NewOrder, OrderStatus};

    fn order() -> Order {
        Order::place(NewOrder {
            customer: "alice".into(),
            items: vec!["coffee".into(), "muffin".into()],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_and_no_regress() {
        let cache = MemoryStatusCache::spawn(DEFAULT_TTL);
        let order = order();

        cache.put(&order.clone().advanced_to(OrderStatus::Delivered)).await.unwrap();
        cache.put(&order).await.unwrap();

        let cached = cache.get(&order.id).await.unwrap().unwrap();
        assert_eq!(cached.status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryStatusCache::spawn(Duration::from_millis(20));
        let order = order();
        cache.put(&order).await.unwrap();
        assert!(cache.get(&order.id).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(&order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rewrite_resets_expiry() {
        let cache = MemoryStatusCache::spawn(Duration::from_millis(60));
        let order = order();
        cache.put(&order).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.put(&order.clone().advanced_to(OrderStatus::Ready)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let cached = cache.get(&order.id).await.unwrap().unwrap();
        assert_eq!(cached.status, OrderStatus::Ready);
    }

    #[tokio::test]
    async fn test_expired_entries_are_swept() {
        let cache = MemoryStatusCache::spawn(Duration::from_millis(20));
        for _ in 0..50 {
            cache.put(&order()).await.unwrap();
        }
        assert_eq!(cache.count().await.unwrap(), 50);

        // No reads in between: only the sweep can shrink the map.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.count().await.unwrap(), 0);
    }
}
