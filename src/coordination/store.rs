//! The key-value store contract the lock is built on.
//!
//! A [`LockStore`] only has to offer an atomic "create if absent, with
//! expiry" and a delete.  Everything else about the lock (key namespacing,
//! owner tokens, release discipline) lives in [`super::locks`].

use async_trait::async_trait;
use thiserror::Error;

/// Failure talking to the backing store.
///
/// This is never used to report contention: a key that already exists is a
/// successful `Ok(false)` from [`LockStore::set_if_absent`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No usable connection to the store.
    #[error("lock store is not connected")]
    Unavailable,

    /// A command reached the store (or tried to) and failed.
    #[error("lock store command {command} failed")]
    Command {
        command: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl StoreError {
    pub fn command<E>(command: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Command {
            command,
            source: Box::new(source),
        }
    }
}

/// Atomic primitives required from the arbitration store.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create `key` with `value` and an expiry of `ttl_secs`, but only if the
    /// key does not exist yet.  Must be a single atomic store operation.
    ///
    /// Returns `true` if the key was created, `false` if it already existed.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64)
        -> Result<bool, StoreError>;

    /// Remove `key` unconditionally.  Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove `key` only if it currently holds exactly `value`.
    ///
    /// Returns `true` if the key was deleted.  The comparison and the delete
    /// must happen atomically at the store.
    async fn delete_if_match(&self, key: &str, value: &str) -> Result<bool, StoreError>;
}
