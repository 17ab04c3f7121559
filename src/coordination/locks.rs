//! Keyed distributed mutual exclusion on top of a [`LockStore`].
//!
//! Acquisition is a single `SET NX EX` style call: whoever reaches the store
//! first holds the key, everybody else is rejected on the spot.  There is no
//! waiting, queueing or retrying here; callers that want to retry do so
//! themselves.
//!
//! The TTL is the only thing that frees a key whose holder died before
//! releasing it.  It must exceed the longest run of the protected operation:
//! once it elapses the store forgets the record and a second caller can
//! acquire the key while the first is still running.  Owner-checked release
//! keeps the slow holder from deleting the second caller's record, but does
//! not stop the two operations from overlapping.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::key::LockKey;
use super::node::owner_token;
use super::store::LockStore;
use crate::config::{LockConfig, ReleaseMode};
use crate::error::LockError;

/// Outcome of one acquisition attempt.
#[must_use]
pub enum Acquisition {
    Acquired(LockGuard),
    /// The key is held by someone else.  Nothing was written.
    Conflict,
}

impl Acquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }

    pub fn into_guard(self) -> Option<LockGuard> {
        match self {
            Self::Acquired(guard) => Some(guard),
            Self::Conflict => None,
        }
    }
}

/// Outcome of releasing a held key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    /// The record was already gone or belonged to a later acquisition,
    /// which means the TTL elapsed while the key was held.
    Lost,
}

/// A held lock record.
///
/// Call [`LockGuard::release`] when done.  A guard dropped without release
/// (panic, cancelled future) schedules a background release on the current
/// tokio runtime; outside a runtime the record is left to its TTL.
pub struct LockGuard {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    mode: ReleaseMode,
    released: bool,
}

impl LockGuard {
    /// The key as written to the store, namespace included.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value written for this acquisition.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Remove the lock record.
    ///
    /// Store failures are returned, not swallowed.  A record that is already
    /// gone is reported as [`Release::Lost`], not as an error.
    pub async fn release(mut self) -> Result<Release, LockError> {
        self.released = true;
        release_record(self.store.as_ref(), &self.key, &self.token, self.mode).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                let token = std::mem::take(&mut self.token);
                let mode = self.mode;
                handle.spawn(async move {
                    if let Err(e) = release_record(store.as_ref(), &key, &token, mode).await {
                        error!(%key, error = %e, "background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(%key, "lock guard dropped outside a runtime; record left to expire");
            }
        }
    }
}

async fn release_record(
    store: &dyn LockStore,
    key: &str,
    token: &str,
    mode: ReleaseMode,
) -> Result<Release, LockError> {
    let released = match mode {
        ReleaseMode::OwnerChecked => store.delete_if_match(key, token).await,
        ReleaseMode::Unconditional => store.delete(key).await.map(|()| true),
    }
    .map_err(|source| LockError::StoreUnavailable {
        key: key.to_string(),
        action: "releasing",
        source,
    })?;

    if released {
        debug!(%key, "lock released");
        Ok(Release::Released)
    } else {
        warn!(%key, "lock release: key missing or owned by a later holder");
        Ok(Release::Lost)
    }
}

/// Serializes keyed operations across every process sharing one store.
///
/// Cheap to clone; clones share the store connection.  Holds no lock state
/// of its own.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    config: Arc<LockConfig>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    fn store_key(&self, key: &LockKey) -> String {
        key.namespaced(&self.config.key_prefix)
    }

    /// Try once to take `key` for `ttl_secs` seconds.
    ///
    /// Returns [`Acquisition::Conflict`] when another caller holds the key,
    /// and an error only when the store itself fails.
    pub async fn try_acquire(
        &self,
        key: &LockKey,
        ttl_secs: u64,
    ) -> Result<Acquisition, LockError> {
        // Redis takes EX as a signed 64-bit integer.
        if ttl_secs == 0 || i64::try_from(ttl_secs).is_err() {
            return Err(LockError::InvalidTtl(ttl_secs));
        }
        let store_key = self.store_key(key);
        let token = owner_token();
        let acquired = self
            .store
            .set_if_absent(&store_key, &token, ttl_secs)
            .await
            .map_err(|source| LockError::StoreUnavailable {
                key: store_key.clone(),
                action: "acquiring",
                source,
            })?;
        debug!(key = %store_key, ttl_secs, acquired, "acquire_lock");

        if !acquired {
            return Ok(Acquisition::Conflict);
        }
        Ok(Acquisition::Acquired(LockGuard {
            store: Arc::clone(&self.store),
            key: store_key,
            token,
            mode: self.config.release_mode,
            released: false,
        }))
    }

    /// Run `operation` while holding `key`.
    ///
    /// If the key is held elsewhere this fails with [`LockError::Conflict`]
    /// and `operation` is never called.  Otherwise `operation` runs and the
    /// key is released afterwards, whatever the outcome; the operation's own
    /// result is returned unchanged.  A failed release does not override
    /// that result: it is logged, and the record expires with its TTL.
    pub async fn run_exclusive<F, Fut, T, E>(
        &self,
        key: &LockKey,
        ttl_secs: u64,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = match self.try_acquire(key, ttl_secs).await? {
            Acquisition::Acquired(guard) => guard,
            Acquisition::Conflict => {
                let key = self.store_key(key);
                debug!(%key, "another caller holds the lock; rejecting");
                return Err(LockError::Conflict { key }.into());
            }
        };

        let result = operation().await;

        let key = guard.key().to_string();
        if let Err(e) = guard.release().await {
            error!(%key, error = %e, "lock release failed; record will expire with its ttl");
        }

        result
    }

    /// Delete `key` whatever it holds.  For operators unwedging a key whose
    /// holder is known to be gone.
    pub async fn force_release(&self, key: &LockKey) -> Result<(), LockError> {
        let store_key = self.store_key(key);
        self.store
            .delete(&store_key)
            .await
            .map_err(|source| LockError::StoreUnavailable {
                key: store_key.clone(),
                action: "force-releasing",
                source,
            })?;
        warn!(key = %store_key, "lock force-released");
        Ok(())
    }

    /// Wrap `operation` so every call runs under the lock for the key that
    /// `derive` computes from the call's arguments.
    pub fn exclusive<D, F>(&self, derive: D, operation: F) -> Exclusive<D, F> {
        Exclusive {
            lock: self.clone(),
            derive,
            operation,
            ttl_secs: self.config.default_ttl_secs,
        }
    }
}

/// An operation bound to a lock and a key derivation function.
///
/// ```ignore
/// let refresh = lock.exclusive(
///     |user: &UserId| format!("refresh:{user}"),
///     |user: UserId| async move { tokens.refresh(&user).await },
/// );
/// refresh.call(user_id).await?;
/// ```
pub struct Exclusive<D, F> {
    lock: DistributedLock,
    derive: D,
    operation: F,
    ttl_secs: u64,
}

impl<D, F> Exclusive<D, F> {
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        D: Fn(&A) -> String,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let key = LockKey::new((self.derive)(&args))?;
        self.lock
            .run_exclusive(&key, self.ttl_secs, || (self.operation)(args))
            .await
    }
}
