//! Toolkit configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: fields assigned on [`ToolkitConfig`] after loading
//! 2. **Environment variables**: values from `TURNSTILE_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: [`ToolkitConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `TURNSTILE_WORKER_THREADS` | `usize` | `pool.worker_threads` |
//! | `TURNSTILE_THREAD_NAME_PREFIX` | `String` | `pool.thread_name_prefix` |
//! | `TURNSTILE_THREAD_STACK_SIZE` | `usize` | `pool.thread_stack_size` |
//! | `TURNSTILE_IDLE_PARK_MS` | `u64` | `pool.idle_park` |
//! | `TURNSTILE_CHANNEL_CAPACITY` | `usize` | `channel.capacity` |
//! | `TURNSTILE_REDUCE_THRESHOLD` | `usize` | `reducer.threshold` |
//! | `TURNSTILE_CANCEL_POLL_MS` | `u64` | `wait.cancel_poll_interval` |
//!
//! # TOML layout
//!
//! ```toml
//! [pool]
//! worker_threads = 4
//! thread_name_prefix = "myapp-worker"
//! thread_stack_size = 2097152
//! idle_park = 50
//!
//! [channel]
//! capacity = 10
//!
//! [reducer]
//! threshold = 10
//!
//! [wait]
//! cancel_poll_interval = 10
//! ```
//!
//! Durations are written in milliseconds. Missing tables and fields keep
//! their defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, ErrorKind};

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "TURNSTILE_WORKER_THREADS";
/// Environment variable name for worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "TURNSTILE_THREAD_NAME_PREFIX";
/// Environment variable name for worker thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "TURNSTILE_THREAD_STACK_SIZE";
/// Environment variable name for idle worker park timeout in milliseconds.
pub const ENV_IDLE_PARK_MS: &str = "TURNSTILE_IDLE_PARK_MS";
/// Environment variable name for default channel capacity.
pub const ENV_CHANNEL_CAPACITY: &str = "TURNSTILE_CHANNEL_CAPACITY";
/// Environment variable name for the reduction split threshold.
pub const ENV_REDUCE_THRESHOLD: &str = "TURNSTILE_REDUCE_THRESHOLD";
/// Environment variable name for the cancellation poll interval in milliseconds.
pub const ENV_CANCEL_POLL_MS: &str = "TURNSTILE_CANCEL_POLL_MS";

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;
/// Default range length at or below which a reduction runs sequentially.
pub const DEFAULT_REDUCE_THRESHOLD: usize = 10;
/// Default worker stack size (2 MiB).
pub const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

const MIN_THREAD_STACK_SIZE: usize = 64 * 1024;

/// Error produced while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// What was expected.
        expected: &'static str,
    },
    /// The config file was not valid TOML for this layout.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(String),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_context(e.to_string())
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub worker_threads: usize,
    /// Name prefix for worker threads; workers are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: usize,
    /// How long an idle worker parks before re-checking the queues.
    #[serde(with = "millis")]
    pub idle_park: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(1, usize::from),
            thread_name_prefix: "turnstile-worker".to_string(),
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
            idle_park: Duration::from_millis(50),
        }
    }
}

/// Channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Default channel capacity.
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Parallel reducer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
    /// Range length at or below which a reduction runs sequentially.
    pub threshold: usize,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_REDUCE_THRESHOLD,
        }
    }
}

/// Blocking wait settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Upper bound on how long a blocked operation sleeps before re-checking
    /// its [`Cx`](crate::Cx) for cancellation.
    #[serde(with = "millis")]
    pub cancel_poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            cancel_poll_interval: crate::cx::cx::DEFAULT_CANCEL_POLL_INTERVAL,
        }
    }
}

/// Complete toolkit configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Worker pool settings.
    pub pool: PoolConfig,
    /// Channel settings.
    pub channel: ChannelConfig,
    /// Reducer settings.
    pub reducer: ReducerConfig,
    /// Blocking wait settings.
    pub wait: WaitConfig,
}

impl ToolkitConfig {
    /// Defaults overlaid with the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but cannot
    /// be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies `TURNSTILE_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] on an unparseable value.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_with(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup` instead of the process
    /// environment.
    ///
    /// Only variables for which `lookup` returns `Some` are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] on an unparseable value.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup(ENV_WORKER_THREADS) {
            self.pool.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
        }
        if let Some(val) = lookup(ENV_THREAD_NAME_PREFIX) {
            self.pool.thread_name_prefix = val;
        }
        if let Some(val) = lookup(ENV_THREAD_STACK_SIZE) {
            self.pool.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
        }
        if let Some(val) = lookup(ENV_IDLE_PARK_MS) {
            self.pool.idle_park = parse_millis(ENV_IDLE_PARK_MS, &val)?;
        }
        if let Some(val) = lookup(ENV_CHANNEL_CAPACITY) {
            self.channel.capacity = parse_usize(ENV_CHANNEL_CAPACITY, &val)?;
        }
        if let Some(val) = lookup(ENV_REDUCE_THRESHOLD) {
            self.reducer.threshold = parse_usize(ENV_REDUCE_THRESHOLD, &val)?;
        }
        if let Some(val) = lookup(ENV_CANCEL_POLL_MS) {
            self.wait.cancel_poll_interval = parse_millis(ENV_CANCEL_POLL_MS, &val)?;
        }
        Ok(())
    }

    /// Clamps values that would make a component unusable.
    ///
    /// Zero counts become 1, durations become at least 1ms, and the stack
    /// size is raised to a 64 KiB floor.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        self.pool.worker_threads = self.pool.worker_threads.max(1);
        self.pool.thread_stack_size = self.pool.thread_stack_size.max(MIN_THREAD_STACK_SIZE);
        self.pool.idle_park = self.pool.idle_park.max(Duration::from_millis(1));
        if self.pool.thread_name_prefix.is_empty() {
            self.pool.thread_name_prefix = PoolConfig::default().thread_name_prefix;
        }
        self.channel.capacity = self.channel.capacity.max(1);
        self.reducer.threshold = self.reducer.threshold.max(1);
        self.wait.cancel_poll_interval = self.wait.cancel_poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document does not match the layout.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is malformed.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Loads a file, then applies environment overrides, then normalizes.
    ///
    /// # Errors
    ///
    /// Propagates any [`ConfigError`] from reading, parsing, or env overrides.
    #[cfg(feature = "config-file")]
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_toml_file(path)?;
        config.apply_env_overrides()?;
        Ok(config.normalize())
    }
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            value: val.to_string(),
            expected: "unsigned integer",
        })
}

fn parse_millis(var: &'static str, val: &str) -> Result<Duration, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidValue {
            var,
            value: val.to_string(),
            expected: "milliseconds",
        })
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ToolkitConfig::default();
        assert_eq!(config.channel.capacity, 10);
        assert_eq!(config.reducer.threshold, 10);
        assert_eq!(config.wait.cancel_poll_interval, Duration::from_millis(10));
        assert_eq!(config.pool.thread_name_prefix, "turnstile-worker");
        assert!(config.pool.worker_threads >= 1);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ToolkitConfig::default();
        config
            .apply_env_overrides_with(lookup_from(&[
                (ENV_WORKER_THREADS, "3"),
                (ENV_THREAD_NAME_PREFIX, "calc"),
                (ENV_CHANNEL_CAPACITY, " 64 "),
                (ENV_REDUCE_THRESHOLD, "500"),
                (ENV_CANCEL_POLL_MS, "2"),
                (ENV_IDLE_PARK_MS, "5"),
            ]))
            .unwrap();
        assert_eq!(config.pool.worker_threads, 3);
        assert_eq!(config.pool.thread_name_prefix, "calc");
        assert_eq!(config.channel.capacity, 64);
        assert_eq!(config.reducer.threshold, 500);
        assert_eq!(config.wait.cancel_poll_interval, Duration::from_millis(2));
        assert_eq!(config.pool.idle_park, Duration::from_millis(5));
    }

    #[test]
    fn unset_vars_leave_defaults() {
        let mut config = ToolkitConfig::default();
        config.apply_env_overrides_with(|_| None).unwrap();
        assert_eq!(config, ToolkitConfig::default());
    }

    #[test]
    fn invalid_value_names_var_and_value() {
        let mut config = ToolkitConfig::default();
        let err = config
            .apply_env_overrides_with(lookup_from(&[(ENV_CHANNEL_CAPACITY, "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                var: ENV_CHANNEL_CAPACITY,
                ..
            }
        ));
        let msg = err.to_string();
        assert!(msg.contains(ENV_CHANNEL_CAPACITY), "{msg}");
        assert!(msg.contains("lots"), "{msg}");
        let converted: Error = err.into();
        assert_eq!(converted.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn normalize_clamps_zeroes() {
        let mut config = ToolkitConfig::default();
        config.pool.worker_threads = 0;
        config.pool.thread_stack_size = 0;
        config.pool.thread_name_prefix.clear();
        config.channel.capacity = 0;
        config.reducer.threshold = 0;
        config.wait.cancel_poll_interval = Duration::ZERO;
        let config = config.normalize();
        assert_eq!(config.pool.worker_threads, 1);
        assert_eq!(config.pool.thread_stack_size, MIN_THREAD_STACK_SIZE);
        assert_eq!(config.pool.thread_name_prefix, "turnstile-worker");
        assert_eq!(config.channel.capacity, 1);
        assert_eq!(config.reducer.threshold, 1);
        assert_eq!(config.wait.cancel_poll_interval, Duration::from_millis(1));
    }
}
