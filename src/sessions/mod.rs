//! Sessions (refresh credentials) and the access-token codec.
//!
//! A session is identified by a high-entropy random token that only the client
//! holds. Stores persist a SHA-256 digest of it; expiry is passive, i.e. reads
//! ignore records past `expires_at` and nothing sweeps them from this crate.

mod memory;
mod repo;
pub mod token;

pub use memory::MemorySessionStore;
pub use repo::PgSessionStore;
pub use token::{TokenCodec, TokenError};

use crate::store::StoreResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

/// Number of attempts before a token collision is surfaced as an error.
pub(crate) const CREATE_ATTEMPTS: usize = 3;

/// Client metadata captured when a session is created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Session {
    pub account_id: Uuid,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    /// Persist a new session and return its raw token identifier.
    async fn create(&self, account_id: Uuid, client: &ClientMeta) -> StoreResult<String>;

    async fn find(&self, token: &str) -> StoreResult<Option<Session>>;

    /// Deleting an unknown token is not an error.
    async fn delete(&self, token: &str) -> StoreResult<()>;

    /// Delete every session of `account_id` except the one identified by `keep`.
    async fn delete_all_except(&self, account_id: Uuid, keep: Option<&str>) -> StoreResult<u64>;
}

/// Create a new session token: 32 bytes from the OS RNG, base64url encoded.
pub(crate) fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
