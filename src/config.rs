use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Connection string (e.g. `rediss://redis.local:6380`).
    pub endpoint: String,
    /// Enable TLS for the Redis connection.
    #[serde(default)]
    pub tls: bool,
    /// Name of the environment variable that holds the Redis auth token.
    #[serde(default = "default_redis_auth_env")]
    pub auth_token_env: String,
    /// Number of pooled connections shared by all lock callers.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_redis_auth_env() -> String {
    "KEYLOCK_REDIS_TOKEN".to_string()
}

fn default_pool_size() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Lock behaviour
// ---------------------------------------------------------------------------

/// How a holder removes its lock record once the protected operation ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseMode {
    /// Delete only if the record still carries this acquisition's token.
    /// A holder that outlived its TTL cannot delete a later holder's record.
    #[default]
    OwnerChecked,
    /// Delete the key whatever it holds.  Kept for deployments that share
    /// keys with clients writing a constant marker value.
    Unconditional,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// TTL (seconds) of a lock record when the caller does not pass one.
    /// Must exceed the longest expected run of the protected operation.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Namespace prepended to every lock key in the store.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub release_mode: ReleaseMode,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            key_prefix: default_key_prefix(),
            release_mode: ReleaseMode::default(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "keylock:".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.redis.endpoint.trim().is_empty(),
        "redis.endpoint must not be empty"
    );
    anyhow::ensure!(config.redis.pool_size > 0, "redis.pool_size must be at least 1");
    anyhow::ensure!(
        config.lock.default_ttl_secs > 0,
        "lock.default_ttl_secs must be at least 1"
    );
    Ok(())
}
