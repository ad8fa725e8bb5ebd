use crate::authority::{AuthorityError, CredentialAuthority, HttpAuthority, MemoryAuthority};
use crate::bus::{EventBus, MemoryBus};
use crate::cache::{CacheError, MemoryStatusCache, RedisStatusCache, StatusCache};
use crate::config::{Config, PipelineConfig};
use crate::store::{MemoryOrderStore, OrderStore, PgOrderStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Timeout for a single call to a remote credential authority.
const AUTHORITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The external collaborators every stage talks to. Owned connection
/// objects, handed to the stages at startup and dropped after they stop.
#[derive(Clone)]
pub struct Backends {
    pub bus: Arc<dyn EventBus>,
    pub store: Arc<dyn OrderStore>,
    pub cache: Arc<dyn StatusCache>,
    pub authority: Arc<dyn CredentialAuthority>,
}

impl Backends {
    /// Everything in-process: bus, store, cache and authority.
    pub fn in_memory(config: &PipelineConfig) -> Self {
        Self {
            bus: Arc::new(MemoryBus::spawn(config.partitions)),
            store: Arc::new(MemoryOrderStore::spawn()),
            cache: Arc::new(MemoryStatusCache::spawn(config.cache_ttl)),
            authority: Arc::new(MemoryAuthority::spawn(crate::authority::memory::TOKEN_TTL)),
        }
    }

    /// Connects to whatever `config` names; in-memory for the rest.
    pub async fn connect(config: &Config) -> Result<Self, LifecycleError> {
        let mut backends = Self::in_memory(&config.pipeline);

        if let Some(url) = &config.database_url {
            backends.store = Arc::new(PgOrderStore::connect(url).await?);
        } else {
            info!("DB_DSN not set; using in-memory order store");
        }

        if let Some(url) = &config.redis_url {
            backends.cache = Arc::new(RedisStatusCache::connect(url, config.pipeline.cache_ttl).await?);
        } else {
            info!("REDIS_URL not set; using in-memory status cache");
        }

        if let Some(url) = &config.authority_url {
            backends.authority = Arc::new(HttpAuthority::new(url.clone(), AUTHORITY_TIMEOUT)?);
            info!(%url, "Using remote credential authority");
        } else {
            info!("AUTH_SERVICE_URL not set; using in-process credential authority");
        }

        Ok(backends)
    }
}
