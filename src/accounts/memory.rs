//! In-process account store for tests and single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Account, AccountStore, NewAccount, Provider};
use crate::store::{StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|account| account.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_external(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> StoreResult<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|account| {
                account.provider == provider && account.external_id.as_deref() == Some(external_id)
            })
            .cloned())
    }

    async fn insert(&self, new: NewAccount) -> StoreResult<Account> {
        let mut accounts = self.accounts.write().await;
        let clash = accounts.values().any(|existing| {
            let same_email = new.email.is_some() && existing.email == new.email;
            let same_external = new.provider.is_oauth()
                && existing.provider == new.provider
                && new.external_id.is_some()
                && existing.external_id == new.external_id;
            same_email || same_external
        });
        if clash {
            return Err(StoreError::Conflict);
        }

        let account = Account {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            provider: new.provider,
            avatar_url: new.avatar_url,
            last_login: new.last_login,
            created_at: Utc::now(),
            external_id: new.external_id,
            password_hash: new.password_hash,
            reset_token_hash: None,
            reset_expires_at: None,
        };
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.last_login = at;
        }
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.reset_token_hash = Some(token_hash.to_vec());
            account.reset_expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &[u8],
        password_hash: &str,
    ) -> StoreResult<Option<Account>> {
        let now = Utc::now();
        let mut accounts = self.accounts.write().await;
        let Some(account) = accounts.values_mut().find(|account| {
            account.reset_token_hash.as_deref() == Some(token_hash)
                && account.reset_expires_at.is_some_and(|expires| expires > now)
        }) else {
            return Ok(None);
        };
        account.password_hash = Some(password_hash.to_string());
        account.reset_token_hash = None;
        account.reset_expires_at = None;
        Ok(Some(account.clone()))
    }
}
