//! # Redis Status Cache
//!
//! One key per order, `order:<id>`, holding the JSON snapshot with an `EX`
//! expiry. Writes go through a small Lua script so the "never lower the
//! cached status" check and the `SET` happen atomically on the server.

use crate::cache::{CacheError, StatusCache};
use crate::model::{Order, OrderId};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

// KEYS[1] = cache key, ARGV[1] = snapshot JSON, ARGV[2] = incoming rank, ARGV[3] = ttl secs.
// Returns 1 when written, 0 when the cached status was already further along.
const PUT_SCRIPT: &str = r#"
local ranks = { received = 0, preparing = 1, ready = 2, delivered = 3 }
local current = redis.call('GET', KEYS[1])
if current then
  local ok, decoded = pcall(cjson.decode, current)
  if ok and type(decoded) == 'table' then
    local rank = ranks[decoded['status']]
    if rank ~= nil and rank > tonumber(ARGV[2]) then
      return 0
    end
  end
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
return 1
"#;

pub fn cache_key(id: &OrderId) -> String {
    format!("order:{id}")
}

#[derive(Clone)]
pub struct RedisStatusCache {
    conn: ConnectionManager,
    ttl: Duration,
    put_script: Script,
}

impl fmt::Debug for RedisStatusCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStatusCache")
            .field("connection", &"ConnectionManager")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RedisStatusCache {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, CacheError> {
        info!("Connecting to Redis status cache");

        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("invalid Redis URL: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable(format!("failed to connect to Redis: {e}")))?;

        info!("Connected to Redis status cache");
        Ok(Self {
            conn,
            ttl,
            put_script: Script::new(PUT_SCRIPT),
        })
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl StatusCache for RedisStatusCache {
    async fn get(&self, id: &OrderId) -> Result<Option<Order>, CacheError> {
        let key = cache_key(id);
        let mut conn = self.conn.clone();
        let data: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| CacheError::Unavailable(format!("Redis GET failed: {e}")))?;

        match data {
            Some(json) => {
                let order = serde_json::from_str(&json).map_err(|e| CacheError::Corrupt {
                    id: id.to_string(),
                    reason: e.to_string(),
                })?;
                debug!(%key, "Cache HIT");
                Ok(Some(order))
            }
            None => {
                debug!(%key, "Cache MISS");
                Ok(None)
            }
        }
    }

    async fn put(&self, order: &Order) -> Result<(), CacheError> {
        let key = cache_key(&order.id);
        let json = serde_json::to_string(order).map_err(|e| CacheError::Corrupt {
            id: order.id.to_string(),
            reason: e.to_string(),
        })?;
        let mut conn = self.conn.clone();
        let written: i64 = self
            .put_script
            .key(&key)
            .arg(json)
            .arg(order.status.rank())
            .arg(self.ttl_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::Unavailable(format!("Redis SET failed: {e}")))?;

        debug!(%key, status = %order.status, written = written == 1, "Cache SET");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        let id: OrderId = "8a6f2b2e-3c4d-4e5f-9a0b-1c2d3e4f5a6b".parse().unwrap();
        assert_eq!(cache_key(&id), "order:8a6f2b2e-3c4d-4e5f-9a0b-1c2d3e4f5a6b");
    }

    #[test]
    fn test_script_knows_every_status() {
        for status in ["received", "preparing", "ready", "delivered"] {
            assert!(PUT_SCRIPT.contains(&format!("{status} = ")));
        }
    }
}
