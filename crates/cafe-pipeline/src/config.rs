//! Service configuration, read once from the environment at startup.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PORT` | `8081` |
//! | `REDIS_URL` | unset: in-memory cache |
//! | `DB_DSN` | unset: in-memory store |
//! | `AUTH_SERVICE_URL` | unset: in-process authority |
//! | `BUS_PARTITIONS` | `3` |
//! | `CACHE_TTL_SECS` | `3600` |
//! | `PREPARATION_MILLIS` | `2000` |
//! | `DELIVERY_MILLIS` | `3000` |
//! | `WORK_TIMEOUT_MILLIS` | `10000` |
//! | `WORK_ATTEMPTS` | `3` |
//! | `WORKERS_PER_STAGE` | `1` |
//! | `SHUTDOWN_GRACE_SECS` | `5` |

use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an unparsable value {value:?}")]
    Unparsable { name: &'static str, value: String },
    #[error("{0}")]
    Invalid(String),
}

/// Knobs of the pipeline itself, independent of which backends are in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Partitions per bus topic.
    pub partitions: u32,
    /// Status cache entry lifetime.
    pub cache_ttl: Duration,
    /// Simulated kitchen work per order.
    pub preparation_time: Duration,
    /// Simulated courier work per order.
    pub delivery_time: Duration,
    /// Upper bound on one attempt of either kind of work.
    pub work_timeout: Duration,
    /// Attempts at the work before the order is skipped.
    pub work_attempts: u32,
    /// Runners per stage, all in the stage's consumer group.
    pub workers_per_stage: usize,
    /// How long shutdown waits for runners to drain.
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            partitions: 3,
            cache_ttl: Duration::from_secs(3600),
            preparation_time: Duration::from_millis(2000),
            delivery_time: Duration::from_millis(3000),
            work_timeout: Duration::from_millis(10_000),
            work_attempts: 3,
            workers_per_stage: 1,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::Invalid("BUS_PARTITIONS must be at least 1".into()));
        }
        if self.workers_per_stage == 0 {
            return Err(ConfigError::Invalid("WORKERS_PER_STAGE must be at least 1".into()));
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::Invalid("CACHE_TTL_SECS must be positive".into()));
        }
        if self.work_timeout <= self.preparation_time || self.work_timeout <= self.delivery_time {
            return Err(ConfigError::Invalid(format!(
                "WORK_TIMEOUT_MILLIS ({:?}) must exceed both work durations",
                self.work_timeout
            )));
        }
        if self.work_attempts == 0 {
            return Err(ConfigError::Invalid("WORK_ATTEMPTS must be at least 1".into()));
        }
        // Work in flight runs to completion on shutdown; the in-process bus
        // forgets anything aborted.
        if self.shutdown_grace <= self.preparation_time || self.shutdown_grace <= self.delivery_time {
            return Err(ConfigError::Invalid(format!(
                "SHUTDOWN_GRACE_SECS ({:?}) must exceed both work durations",
                self.shutdown_grace
            )));
        }
        Ok(())
    }
}

/// Full service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub http_port: u16,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub authority_url: Option<String>,
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8081,
            redis_url: None,
            database_url: None,
            authority_url: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source and validates it.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let text = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            http_port: parse(&lookup, "PORT")?.unwrap_or(defaults.http_port),
            redis_url: text("REDIS_URL"),
            database_url: text("DB_DSN"),
            authority_url: text("AUTH_SERVICE_URL"),
            pipeline: PipelineConfig {
                partitions: parse(&lookup, "BUS_PARTITIONS")?
                    .unwrap_or(defaults.pipeline.partitions),
                cache_ttl: parse(&lookup, "CACHE_TTL_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.pipeline.cache_ttl),
                preparation_time: parse(&lookup, "PREPARATION_MILLIS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.pipeline.preparation_time),
                delivery_time: parse(&lookup, "DELIVERY_MILLIS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.pipeline.delivery_time),
                work_timeout: parse(&lookup, "WORK_TIMEOUT_MILLIS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.pipeline.work_timeout),
                work_attempts: parse(&lookup, "WORK_ATTEMPTS")?
                    .unwrap_or(defaults.pipeline.work_attempts),
                workers_per_stage: parse(&lookup, "WORKERS_PER_STAGE")?
                    .unwrap_or(defaults.pipeline.workers_per_stage),
                shutdown_grace: parse(&lookup, "SHUTDOWN_GRACE_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.pipeline.shutdown_grace),
            },
        };
        config.pipeline.validate()?;
        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name).map(|v| v.trim().to_string()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Unparsable { name, value: v }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.http_port, 8081);
        assert_eq!(config.pipeline.cache_ttl, Duration::from_secs(3600));
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("PORT", "9000"),
            ("REDIS_URL", "redis://cache:6379"),
            ("DB_DSN", "postgres://db/cafe"),
            ("BUS_PARTITIONS", "6"),
            ("PREPARATION_MILLIS", "10"),
            ("DELIVERY_MILLIS", "20"),
            ("WORK_TIMEOUT_MILLIS", "100"),
            ("WORKERS_PER_STAGE", "2"),
            ("WORK_ATTEMPTS", "5"),
        ])
        .unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.database_url.as_deref(), Some("postgres://db/cafe"));
        assert_eq!(config.pipeline.partitions, 6);
        assert_eq!(config.pipeline.delivery_time, Duration::from_millis(20));
        assert_eq!(config.pipeline.workers_per_stage, 2);
        assert_eq!(config.pipeline.work_attempts, 5);
    }

    #[test]
    fn test_unparsable_is_an_error() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Unparsable {
                name: "PORT",
                value: "eighty".into()
            }
        );
    }

    #[test]
    fn test_validation() {
        assert!(matches!(load(&[("BUS_PARTITIONS", "0")]), Err(ConfigError::Invalid(_))));
        assert!(matches!(load(&[("WORKERS_PER_STAGE", "0")]), Err(ConfigError::Invalid(_))));
        assert!(matches!(load(&[("CACHE_TTL_SECS", "0")]), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            load(&[("WORK_TIMEOUT_MILLIS", "2500")]),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(load(&[("WORK_ATTEMPTS", "0")]), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            load(&[("SHUTDOWN_GRACE_SECS", "2")]),
            Err(ConfigError::Invalid(_))
        ));
    }
}
