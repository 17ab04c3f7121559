//! Redis-backed distributed mutual exclusion for keyed critical sections.
//!
//! ```ignore
//! let pool = keylock::coordination::redis::create_pool(&config.redis).await?;
//! let lock = DistributedLock::new(Arc::new(RedisStore::new(pool)), config.lock);
//!
//! let key = LockKey::from_parts(["refresh", &user_id])?;
//! let token = lock
//!     .run_exclusive(&key, 5, || async { refresh_token(&user_id).await })
//!     .await?;
//! ```

pub mod config;
pub mod coordination;
pub mod error;

pub use config::{Config, LockConfig, RedisConfig, ReleaseMode};
pub use coordination::key::LockKey;
pub use coordination::locks::{Acquisition, DistributedLock, Exclusive, LockGuard, Release};
pub use coordination::memory::MemoryStore;
pub use coordination::redis::RedisStore;
pub use coordination::store::{LockStore, StoreError};
pub use error::LockError;
