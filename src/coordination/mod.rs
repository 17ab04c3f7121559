//! Distributed coordination backed by Redis (or any store with an atomic
//! set-if-absent).
//!
//! Provides keyed locks that serialize a critical operation across every
//! process sharing one store.  All lock state lives in the store so that
//! callers on different hosts can cooperate without any local shared state.

pub mod key;
pub mod locks;
pub mod memory;
pub mod node;
pub mod redis;
pub mod store;
