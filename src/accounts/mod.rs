//! Accounts: the identity record and its store.
//!
//! Uniqueness is owned by the store: `email` is unique when present and
//! `(provider, external_id)` is unique for `OAuth` accounts. Both the Postgres
//! and the in-memory store report a violated constraint as `StoreError::Conflict`.

mod memory;
mod models;
mod repo;

pub use memory::MemoryAccountStore;
pub use models::{Account, NewAccount, Provider, UnknownProvider};
pub use repo::PgAccountStore;

use crate::store::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;

    /// Lookup by normalized email.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    async fn find_by_external(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> StoreResult<Option<Account>>;

    async fn insert(&self, account: NewAccount) -> StoreResult<Account>;

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Swap in a new password hash for the account holding an unexpired reset
    /// token with this hash, clearing the reset fields in the same write.
    async fn consume_reset_token(
        &self,
        token_hash: &[u8],
        password_hash: &str,
    ) -> StoreResult<Option<Account>>;
}
