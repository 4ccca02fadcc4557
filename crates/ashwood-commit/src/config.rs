//! Pool and flush settings.
//!
//! Both structs deserialize from JSON and can be read from `ASHWOOD_*`
//! environment variables. Unset variables fall back to the defaults below;
//! set but unparsable ones are a [`ConfigError`].
//!
//! | Variable                   | Default     |
//! |----------------------------|-------------|
//! | `ASHWOOD_POOL_MIN`         | 1           |
//! | `ASHWOOD_POOL_MAX`         | 5           |
//! | `ASHWOOD_POOL_WAIT_MS`     | 30000       |
//! | `ASHWOOD_VALIDATION_QUERY` | none        |
//! | `ASHWOOD_PK_CACHE_SIZE`    | 20          |
//! | `ASHWOOD_PK_STRATEGY`      | `generator` |

use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_MIN_CONNECTIONS: usize = 1;
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;
pub const DEFAULT_MAX_QUEUE_WAIT_MS: u64 = 30_000;
pub const DEFAULT_PK_CACHE_SIZE: u32 = 20;

/// Connection pool bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    /// How long `acquire` waits for a connection, in milliseconds.
    pub max_queue_wait_ms: u64,
    /// Run on every checkout; a failure triggers one reconnect.
    pub validation_query: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_queue_wait_ms: DEFAULT_MAX_QUEUE_WAIT_MS,
            validation_query: None,
        }
    }
}

impl PoolConfig {
    pub fn max_queue_wait(&self) -> Duration {
        Duration::from_millis(self.max_queue_wait_ms)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = PoolConfig::default();
        Ok(PoolConfig {
            min_connections: parse_or(&lookup, "ASHWOOD_POOL_MIN", defaults.min_connections)?,
            max_connections: parse_or(&lookup, "ASHWOOD_POOL_MAX", defaults.max_connections)?,
            max_queue_wait_ms: parse_or(&lookup, "ASHWOOD_POOL_WAIT_MS", defaults.max_queue_wait_ms)?,
            validation_query: lookup("ASHWOOD_VALIDATION_QUERY").filter(|q| !q.trim().is_empty()),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// How primary keys of inserted rows are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PkStrategy {
    /// Drawn from a [`PkGenerator`](crate::pk::PkGenerator) before insert.
    #[default]
    Generator,
    /// Left out of the INSERT; read back from the database afterwards.
    AutoIncrement,
    /// Supplied by the caller in the object's values.
    Provided,
}

impl FromStr for PkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generator" => Ok(PkStrategy::Generator),
            "auto_increment" | "autoincrement" | "auto-increment" => Ok(PkStrategy::AutoIncrement),
            "provided" => Ok(PkStrategy::Provided),
            other => Err(format!(
                "unknown strategy '{other}', expected generator, auto_increment or provided"
            )),
        }
    }
}

/// Flush settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Strategy for tables not listed in `table_strategies`.
    pub pk_strategy: PkStrategy,
    /// Per-table overrides, keyed by table full name.
    pub table_strategies: IndexMap<String, PkStrategy>,
    /// Keys reserved per round trip by the key support table generator.
    pub pk_cache_size: u32,
}

impl Default for FlushConfig {
    fn default() -> Self {
        FlushConfig {
            pk_strategy: PkStrategy::default(),
            table_strategies: IndexMap::new(),
            pk_cache_size: DEFAULT_PK_CACHE_SIZE,
        }
    }
}

impl FlushConfig {
    pub fn strategy_for(&self, table: &str) -> PkStrategy {
        self.table_strategies
            .get(table)
            .copied()
            .unwrap_or(self.pk_strategy)
    }

    pub fn with_table_strategy(mut self, table: impl Into<String>, strategy: PkStrategy) -> Self {
        self.table_strategies.insert(table.into(), strategy);
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = FlushConfig::default();
        let pk_cache_size: u32 = parse_or(&lookup, "ASHWOOD_PK_CACHE_SIZE", defaults.pk_cache_size)?;
        if pk_cache_size == 0 {
            return Err(ConfigError::Invalid {
                key: "ASHWOOD_PK_CACHE_SIZE".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(FlushConfig {
            pk_strategy: parse_or(&lookup, "ASHWOOD_PK_STRATEGY", defaults.pk_strategy)?,
            table_strategies: IndexMap::new(),
            pk_cache_size,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let pool = PoolConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(pool, PoolConfig::default());
        assert_eq!(pool.max_queue_wait(), Duration::from_secs(30));

        let flush = FlushConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(flush.pk_cache_size, 20);
        assert_eq!(flush.pk_strategy, PkStrategy::Generator);
    }

    #[test]
    fn reads_overrides() {
        let pool = PoolConfig::from_lookup(env(&[
            ("ASHWOOD_POOL_MIN", "2"),
            ("ASHWOOD_POOL_MAX", "8"),
            ("ASHWOOD_POOL_WAIT_MS", "250"),
            ("ASHWOOD_VALIDATION_QUERY", "SELECT 1"),
        ]))
        .unwrap();
        assert_eq!(pool.min_connections, 2);
        assert_eq!(pool.max_connections, 8);
        assert_eq!(pool.max_queue_wait(), Duration::from_millis(250));
        assert_eq!(pool.validation_query.as_deref(), Some("SELECT 1"));

        let flush = FlushConfig::from_lookup(env(&[("ASHWOOD_PK_STRATEGY", "auto_increment")])).unwrap();
        assert_eq!(flush.strategy_for("ANY"), PkStrategy::AutoIncrement);
    }

    #[test]
    fn rejects_bad_values() {
        let err = PoolConfig::from_lookup(env(&[("ASHWOOD_POOL_MAX", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "ASHWOOD_POOL_MAX"));

        assert!(FlushConfig::from_lookup(env(&[("ASHWOOD_PK_CACHE_SIZE", "0")])).is_err());
        assert!(FlushConfig::from_lookup(env(&[("ASHWOOD_PK_STRATEGY", "uuid")])).is_err());
    }

    #[test]
    fn json_fills_missing_fields() {
        let flush = FlushConfig::from_json(
            r#"{"table_strategies": {"ARTIST": "provided"}}"#,
        )
        .unwrap();
        assert_eq!(flush.strategy_for("ARTIST"), PkStrategy::Provided);
        assert_eq!(flush.strategy_for("PAINTING"), PkStrategy::Generator);
        assert_eq!(flush.pk_cache_size, 20);

        let pool = PoolConfig::from_json(r#"{"max_connections": 2}"#).unwrap();
        assert_eq!(pool.min_connections, 1);
        assert_eq!(pool.max_connections, 2);
    }
}
