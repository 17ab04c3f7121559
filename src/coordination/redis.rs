//! Redis-backed [`LockStore`] and client pool creation.
//!
//! Builds a [`fred::clients::Pool`] configured from
//! [`crate::config::RedisConfig`], optionally enabling TLS via `rustls` and
//! reading the auth token from an environment variable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fred::clients::Pool;
use fred::interfaces::{ClientLike, KeysInterface, LuaInterface};
use fred::types::config::{ReconnectPolicy, ServerConfig, TlsConnector};
use fred::types::{Builder, Expiration, SetOptions};
use tracing::{debug, trace};

use super::store::{LockStore, StoreError};
use crate::config::RedisConfig;

/// Deletes `KEYS[1]` only when its value equals `ARGV[1]`.
const COMPARE_AND_DELETE: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// Lock store on top of a shared fred connection pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.pool.is_connected() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let ttl = i64::try_from(ttl_secs).map_err(|e| StoreError::command("SET NX EX", e))?;
        self.ensure_connected()?;
        let result: Option<String> = self
            .pool
            .set(
                key,
                value,
                Some(Expiration::EX(ttl)),
                Some(SetOptions::NX),
                false,
            )
            .await
            .map_err(|e| StoreError::command("SET NX EX", e))?;
        // SET … NX returns "OK" when the key was set, nil otherwise.
        let created = result.is_some();
        trace!(%key, ttl_secs, created, "SET NX EX");
        Ok(created)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let removed: i64 = self
            .pool
            .del(key)
            .await
            .map_err(|e| StoreError::command("DEL", e))?;
        trace!(%key, removed, "DEL");
        Ok(())
    }

    async fn delete_if_match(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.ensure_connected()?;
        let removed: i64 = self
            .pool
            .eval(
                COMPARE_AND_DELETE,
                vec![key.to_string()],
                vec![value.to_string()],
            )
            .await
            .map_err(|e| StoreError::command("EVAL compare-and-delete", e))?;
        trace!(%key, removed, "compare-and-delete");
        Ok(removed == 1)
    }
}

/// Connect a pool of `config.pool_size` clients and check it with a PING
/// before handing it out.
pub async fn create_pool(config: &RedisConfig) -> Result<Pool> {
    let password = std::env::var(&config.auth_token_env).ok();
    let fred_config = client_config(config, password)?;

    let mut builder = Builder::from_config(fred_config);
    // Retry immediately, then back off from 100ms doubling up to 30s.
    builder.set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2));

    let pool = builder
        .build_pool(config.pool_size)
        .with_context(|| format!("failed to build Redis pool for {}", config.endpoint))?;
    pool.init()
        .await
        .with_context(|| format!("failed to connect to Redis at {}", config.endpoint))?;
    let _: String = pool.ping(None).await.context("Redis PING failed")?;

    debug!(
        endpoint = %config.endpoint,
        tls = config.tls,
        pool_size = config.pool_size,
        "Redis pool ready"
    );
    Ok(pool)
}

/// Translate [`RedisConfig`] into a fred client config.  `password` is the
/// resolved value of `auth_token_env`, if that variable is set.
fn client_config(
    config: &RedisConfig,
    password: Option<String>,
) -> Result<fred::types::config::Config> {
    let endpoint = config
        .endpoint
        .trim_start_matches("rediss://")
        .trim_start_matches("redis://");
    let (host, port) = parse_host_port(endpoint)?;

    let tls = if config.tls {
        Some(TlsConnector::default_rustls()?.into())
    } else {
        None
    };

    Ok(fred::types::config::Config {
        server: ServerConfig::new_centralized(host, port),
        password,
        tls,
        ..fred::types::config::Config::default()
    })
}

/// Split `host[:port][/db]` into host and port, defaulting to 6379.
pub fn parse_host_port(endpoint: &str) -> Result<(&str, u16)> {
    let authority = endpoint.split('/').next().unwrap_or(endpoint);
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("invalid port in Redis endpoint {endpoint:?}"))?;
            Ok((host, port))
        }
        None => Ok((authority, 6379)),
    }
}
