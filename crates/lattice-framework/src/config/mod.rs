//! Layered configuration: sources, merging, live reload.

pub mod manager;
pub mod source;

pub use manager::{
    ConfigManager, DEFAULT_ENV_PREFIX, DEFAULT_POLL_INTERVAL, WatcherFn, WatcherId,
};
pub use source::{ConfigError, ConfigFormat, ConfigResult, ConfigSource, coerce_env_value, env_overlay};
