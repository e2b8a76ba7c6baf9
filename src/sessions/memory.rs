//! In-process session store with the same TTL semantics as the Postgres store.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use std::{collections::HashMap, time::Duration};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{generate_session_token, ClientMeta, Session, SessionStore, CREATE_ATTEMPTS};
use crate::store::{hash_secret, StoreError, StoreResult};

#[derive(Debug)]
pub struct MemorySessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<Vec<u8>, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Live sessions currently held for an account.
    pub async fn count_for(&self, account_id: Uuid) -> usize {
        let now = Utc::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|session| session.account_id == account_id && session.is_live(now))
            .count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create(&self, account_id: Uuid, client: &ClientMeta) -> StoreResult<String> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|err| StoreError::Backend(anyhow!("invalid session ttl: {err}")))?;
        let mut sessions = self.sessions.write().await;
        for _ in 0..CREATE_ATTEMPTS {
            let token = generate_session_token()?;
            let key = hash_secret(&token);
            if sessions.contains_key(&key) {
                continue;
            }
            let now = Utc::now();
            sessions.insert(
                key,
                Session {
                    account_id,
                    user_agent: client.user_agent.clone(),
                    ip: client.ip.clone(),
                    created_at: now,
                    expires_at: now + ttl,
                },
            );
            return Ok(token);
        }
        Err(StoreError::Backend(anyhow!(
            "failed to generate unique session token"
        )))
    }

    async fn find(&self, token: &str) -> StoreResult<Option<Session>> {
        let now = Utc::now();
        Ok(self
            .sessions
            .read()
            .await
            .get(&hash_secret(token))
            .filter(|session| session.is_live(now))
            .cloned())
    }

    async fn delete(&self, token: &str) -> StoreResult<()> {
        self.sessions.write().await.remove(&hash_secret(token));
        Ok(())
    }

    async fn delete_all_except(&self, account_id: Uuid, keep: Option<&str>) -> StoreResult<u64> {
        let keep = keep.map(hash_secret);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|key, session| {
            session.account_id != account_id || keep.as_ref() == Some(key)
        });
        Ok(u64::try_from(before - sessions.len()).unwrap_or(u64::MAX))
    }
}
