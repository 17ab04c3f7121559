//! Errors raised by the lock itself.
//!
//! Failures of the protected operation are not represented here: they are
//! returned to the caller untouched.

use thiserror::Error;

use crate::coordination::store::StoreError;

#[derive(Debug, Error)]
pub enum LockError {
    /// Another caller holds the key.  The protected operation was not run.
    #[error("lock {key} is held by another caller")]
    Conflict { key: String },

    /// The store could not be reached or rejected a command.  Unlike
    /// [`LockError::Conflict`] this says nothing about who holds the key.
    #[error("lock store unavailable while {action} {key}")]
    StoreUnavailable {
        key: String,
        action: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("invalid lock key {0:?}")]
    InvalidKey(String),

    /// TTLs are whole seconds and must be at least one.
    #[error("invalid lock ttl {0}s")]
    InvalidTtl(u64),
}

impl LockError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}
