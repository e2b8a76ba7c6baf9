//! One-time-secret store: short-TTL key/value entries.
//!
//! Holds staged signup payloads, OAuth `state` records and cached idempotent
//! responses. A key is invisible once its TTL elapses; writes replace the whole
//! value in one statement so readers never observe a partial entry.

mod memory;
mod repo;

pub use memory::MemorySecretStore;
pub use repo::PgSecretStore;

use crate::store::StoreResult;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    /// Insert or replace `key`, visible for `ttl` from now.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Insert `key` only if no live entry exists. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Read and delete in one step; a live value is returned to exactly one caller.
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;
}

pub(crate) fn ttl_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}
