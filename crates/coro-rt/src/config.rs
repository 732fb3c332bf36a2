// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object or an empty
//! environment both produce a working runtime.

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::logging::LogOptions;

/// A named worker pool, addressable through `ThreadSelector::Pool`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub threads: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Threads in the default (`AnyWorker`) pool. 0 picks the number of cores.
    pub worker_threads: usize,
    /// Extra named pools, started with the runtime.
    pub pools: Vec<PoolConfig>,
    /// Sleep between `pump()` calls in a `PrimaryLoop`.
    pub primary_tick_ms: u64,
    /// Prefix for every thread the runtime spawns.
    pub thread_name_prefix: String,
    pub log: LogOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            pools: Vec::new(),
            primary_tick_ms: 5,
            thread_name_prefix: "coro".to_string(),
            log: LogOptions::DEFAULT,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `CORO_WORKER_THREADS`, `CORO_POOLS`
    /// (`name:threads,...`), `CORO_PRIMARY_TICK_MS` and the log variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            log: LogOptions::from_env(),
            ..Self::default()
        };
        if let Ok(value) = env::var("CORO_WORKER_THREADS") {
            config.worker_threads = parse_number("CORO_WORKER_THREADS", &value)?;
        }
        if let Ok(value) = env::var("CORO_PRIMARY_TICK_MS") {
            config.primary_tick_ms = parse_number("CORO_PRIMARY_TICK_MS", &value)?;
        }
        if let Ok(value) = env::var("CORO_POOLS") {
            config.pools = parse_pools(&value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_pool(mut self, name: impl Into<String>, threads: usize) -> Self {
        self.pools.push(PoolConfig {
            name: name.into(),
            threads,
        });
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Resolved size of the default pool.
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    pub fn primary_tick(&self) -> Duration {
        Duration::from_millis(self.primary_tick_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.pools.iter().find(|p| p.threads == 0) {
            Some(pool) => Err(ConfigError::EmptyPool(pool.name.clone())),
            None => Ok(()),
        }
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_pools(value: &str) -> Result<Vec<PoolConfig>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let Some((name, threads)) = entry.split_once(':') else {
                return Err(ConfigError::Env {
                    var: "CORO_POOLS",
                    value: value.to_string(),
                    reason: format!("`{entry}` is not `name:threads`"),
                });
            };
            Ok(PoolConfig {
                name: name.trim().to_string(),
                threads: parse_number("CORO_POOLS", threads)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;

    #[test]
    fn empty_json_gives_defaults() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn json_overrides_fields() {
        let config = RuntimeConfig::from_json(
            r#"{
                "worker_threads": 3,
                "pools": [{"name": "io", "threads": 2}],
                "log": {"level": "trace"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.pools[0].name, "io");
        assert_eq!(config.log.level, LogLevel::Trace);
        assert_eq!(config.primary_tick_ms, 5);
    }

    #[test]
    fn json_rejects_empty_pool() {
        let err = RuntimeConfig::from_json(r#"{"pools": [{"name": "io", "threads": 0}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPool(name) if name == "io"));
    }

    #[test]
    fn json_rejects_unknown_types() {
        assert!(matches!(
            RuntimeConfig::from_json(r#"{"worker_threads": "many"}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn pool_list_parses() {
        let pools = parse_pools("io:2, render:1,").unwrap();
        assert_eq!(
            pools,
            vec![
                PoolConfig { name: "io".into(), threads: 2 },
                PoolConfig { name: "render".into(), threads: 1 },
            ]
        );
    }

    #[test]
    fn pool_list_rejects_missing_count() {
        assert!(parse_pools("io").is_err());
        assert!(parse_pools("io:x").is_err());
    }

    #[test]
    fn zero_workers_resolves_to_parallelism() {
        let config = RuntimeConfig::default().with_worker_threads(0);
        assert!(config.effective_worker_threads() >= 1);
        assert_eq!(RuntimeConfig::default().with_worker_threads(2).effective_worker_threads(), 2);
    }
}
