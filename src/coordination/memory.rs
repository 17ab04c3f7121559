//! In-process [`LockStore`] used by tests and single-node setups.
//!
//! Expiry runs on the tokio clock, so tests with a paused runtime can step
//! past a TTL with `tokio::time::advance`.  Every insert sweeps out expired
//! entries, so per-user keys that are never touched again do not pile up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

use super::store::{LockStore, StoreError};

#[derive(Debug)]
struct Entry {
    value: String,
    /// `None` when the TTL is too large to represent on this clock.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// A `HashMap` behind a mutex, with TTLs and fault injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only the delete operations fail, as a store that drops the
    /// connection mid-operation would.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Whether a live (unexpired) record exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    /// The live value stored under `key`, if any.
    pub fn value(&self, key: &str) -> Option<String> {
        let mut entries = self.lock_entries();
        purge_if_expired(&mut entries, key, Instant::now());
        entries.get(key).map(|e| e.value.clone())
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock_entries()
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding this mutex cannot leave the map half-written,
        // so a poisoned lock is still safe to use.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn check_delete(&self) -> Result<(), StoreError> {
        self.check_available()?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::command(
                "DEL",
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"),
            ));
        }
        Ok(())
    }
}

fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
        trace!(%key, "memory store entry expired");
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        if entries.len() < before {
            trace!(swept = before - entries.len(), "memory store entries expired");
        }
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now.checked_add(Duration::from_secs(ttl_secs)),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_delete()?;
        self.lock_entries().remove(key);
        Ok(())
    }

    async fn delete_if_match(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.check_delete()?;
        let mut entries = self.lock_entries();
        purge_if_expired(&mut entries, key, Instant::now());
        match entries.get(key) {
            Some(entry) if entry.value == value => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_only_once() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "a", 5).await.unwrap());
        assert!(!store.set_if_absent("k", "b", 5).await.unwrap());
        assert_eq!(store.value("k").as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "a", 1).await.unwrap());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(store.contains("k"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!store.contains("k"));
        assert!(store.set_if_absent("k", "b", 1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_sweeps_expired_entries() {
        let store = MemoryStore::new();
        for user in 0..1000 {
            let key = format!("refresh:user-{user}");
            assert!(store.set_if_absent(&key, "a", 1).await.unwrap());
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(store.set_if_absent("refresh:user-new", "b", 1).await.unwrap());
        assert_eq!(store.lock_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow_clock() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "a", u64::MAX).await.unwrap());
        assert!(store.contains("k"));
        assert!(!store.set_if_absent("k", "b", 5).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_ok() {
        let store = MemoryStore::new();
        store.delete("missing").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_if_match_compares_value() {
        let store = MemoryStore::new();
        store.set_if_absent("k", "mine", 5).await.unwrap();
        assert!(!store.delete_if_match("k", "theirs").await.unwrap());
        assert!(store.contains("k"));
        assert!(store.delete_if_match("k", "mine").await.unwrap());
        assert!(!store.contains("k"));
        assert!(!store.delete_if_match("k", "mine").await.unwrap());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.set_if_absent("k", "a", 5).await,
            Err(StoreError::Unavailable)
        ));
        store.set_unavailable(false);

        store.set_if_absent("k", "a", 5).await.unwrap();
        store.fail_deletes(true);
        assert!(matches!(
            store.delete("k").await,
            Err(StoreError::Command { command: "DEL", .. })
        ));
        assert!(store.contains("k"));
    }
}
