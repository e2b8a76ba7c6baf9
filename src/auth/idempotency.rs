//! Idempotency guard for mutating endpoints.
//!
//! A request key is claimed with a `pending` marker before the handler runs, so
//! concurrent retries cannot both execute. A successful outcome replaces the
//! marker and is replayed verbatim until the TTL elapses; a failed handler
//! releases the claim so the client may retry.

use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, warn};

use super::AuthError;
use crate::secrets::SecretStore;

const MAX_KEY_LEN: usize = 255;

/// Response captured for replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum Record {
    Pending,
    Completed(Outcome),
}

/// Result of running a guarded handler.
#[derive(Debug)]
pub enum Guarded<T> {
    /// A prior outcome for this key was returned without executing the handler.
    Replayed(Outcome),
    /// The handler ran; `T` carries anything besides the body (e.g. cookies).
    Fresh(Outcome, T),
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn SecretStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn SecretStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn storage_key(scope: &str, key: Option<&str>) -> Result<String, AuthError> {
        let key = key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(AuthError::IdempotencyKeyRequired)?;
        if key.len() > MAX_KEY_LEN {
            return Err(AuthError::validation("idempotency-key is too long"));
        }
        Ok(format!("idem:{scope}:{key}"))
    }

    /// Run `handler` at most once per `(scope, key)` within the TTL window.
    ///
    /// # Errors
    /// `IdempotencyKeyRequired` when the key is missing, `IdempotencyInProgress`
    /// when another request holds the key, or the handler's own error.
    pub async fn run<T, F, Fut>(
        &self,
        scope: &str,
        key: Option<&str>,
        handler: F,
    ) -> Result<Guarded<T>, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(Outcome, T), AuthError>>,
    {
        let storage_key = Self::storage_key(scope, key)?;
        let pending = serde_json::to_string(&Record::Pending).map_err(anyhow::Error::from)?;

        if !self
            .store
            .set_if_absent(&storage_key, &pending, self.ttl)
            .await?
        {
            return match self.load(&storage_key).await? {
                Some(Record::Completed(outcome)) => {
                    debug!(scope, "replaying cached outcome");
                    Ok(Guarded::Replayed(outcome))
                }
                Some(Record::Pending) => Err(AuthError::IdempotencyInProgress),
                // Expired between the claim attempt and the read.
                None => Err(AuthError::IdempotencyInProgress),
            };
        }

        match handler().await {
            Ok((outcome, extra)) => {
                self.record(&storage_key, &outcome).await;
                Ok(Guarded::Fresh(outcome, extra))
            }
            Err(err) => {
                if let Err(release) = self.store.delete(&storage_key).await {
                    warn!(scope, "failed to release idempotency key: {release}");
                }
                Err(err)
            }
        }
    }

    async fn load(&self, storage_key: &str) -> Result<Option<Record>, AuthError> {
        let Some(raw) = self.store.get(storage_key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!("discarding unreadable idempotency record: {err}");
                Ok(None)
            }
        }
    }

    /// Caching is best effort: the handler already ran, so a write failure is only logged.
    async fn record(&self, storage_key: &str, outcome: &Outcome) {
        let value = match serde_json::to_string(&Record::Completed(outcome.clone())) {
            Ok(value) => value,
            Err(err) => {
                warn!("failed to encode idempotency record: {err}");
                return;
            }
        };
        if let Err(err) = self.store.set_with_ttl(storage_key, &value, self.ttl).await {
            warn!("failed to cache idempotent outcome: {err}");
        }
    }
}
