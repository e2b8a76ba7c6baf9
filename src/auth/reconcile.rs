//! Identity reconciliation: map local signups and external identities onto
//! accounts, and decide when a login needs a new session.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{password, AuthConfig, AuthError};
use crate::{
    accounts::{Account, AccountStore, NewAccount, Provider},
    notify::{EmailMessage, EmailTemplate, Notifier},
    oauth::ExternalIdentity,
    secrets::SecretStore,
    sessions::{ClientMeta, SessionStore},
    store::StoreError,
};

/// Signup payload staged until the emailed code is confirmed.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PendingSignup {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

pub(crate) fn otp_key(otp: &str, email: &str) -> String {
    format!("otp:{email}:{otp}")
}

/// Queue a message, logging instead of failing when the queue is unavailable.
pub(crate) async fn notify(notifier: &dyn Notifier, message: EmailMessage) {
    let template = message.template;
    if let Err(err) = notifier.enqueue(message).await {
        warn!(%template, "failed to enqueue email: {err}");
    }
}

#[derive(Clone)]
pub struct Reconciler {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionStore>,
    secrets: Arc<dyn SecretStore>,
    notifier: Arc<dyn Notifier>,
    config: AuthConfig,
}

impl Reconciler {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionStore>,
        secrets: Arc<dyn SecretStore>,
        notifier: Arc<dyn Notifier>,
        config: AuthConfig,
    ) -> Self {
        Self {
            accounts,
            sessions,
            secrets,
            notifier,
            config,
        }
    }

    /// Stage a local signup under a fresh code and return the code.
    ///
    /// No account exists until [`Self::materialize_local_account`] runs.
    ///
    /// # Errors
    /// `DuplicateAccount` when the email is taken, store errors otherwise.
    #[instrument(skip(self, password, name))]
    pub async fn stage_local_signup(
        &self,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        if self.accounts.find_by_email(email).await?.is_some() {
            return Err(AuthError::DuplicateAccount);
        }

        let password_hash = password::hash_password(password, self.config.password_params())?;
        let payload = serde_json::to_string(&PendingSignup {
            email: email.to_string(),
            name: name.to_string(),
            password_hash,
        })
        .map_err(anyhow::Error::from)?;

        let otp = password::generate_otp();
        self.secrets
            .set_with_ttl(&otp_key(&otp, email), &payload, self.config.otp_ttl())
            .await?;
        Ok(otp)
    }

    /// Turn a staged signup into an account and consume the staged entry.
    ///
    /// The entry is claimed atomically before the insert, so of two
    /// concurrent confirmations of the same code exactly one proceeds.
    ///
    /// # Errors
    /// `OtpInvalidOrExpired` when nothing is staged under `(otp, email)` or
    /// another confirmation already claimed it, `DuplicateAccount` if the
    /// email was claimed in the meantime.
    #[instrument(skip(self, otp))]
    pub async fn materialize_local_account(
        &self,
        otp: &str,
        email: &str,
    ) -> Result<Account, AuthError> {
        let key = otp_key(otp, email);
        let Some(raw) = self.secrets.take(&key).await? else {
            return Err(AuthError::OtpInvalidOrExpired);
        };
        let pending: PendingSignup =
            serde_json::from_str(&raw).map_err(|err| anyhow::anyhow!("corrupt pending signup: {err}"))?;

        let inserted = self
            .accounts
            .insert(NewAccount {
                email: Some(pending.email),
                name: pending.name,
                provider: Provider::Local,
                external_id: None,
                avatar_url: None,
                password_hash: Some(pending.password_hash),
                last_login: Utc::now(),
            })
            .await;

        match inserted {
            Ok(account) => {
                info!(account_id = %account.id, "local account created");
                Ok(account)
            }
            Err(StoreError::Conflict) => Err(AuthError::DuplicateAccount),
            Err(err) => {
                // Transient failure: put the code back so the user can retry.
                if let Err(restage) = self
                    .secrets
                    .set_with_ttl(&key, &raw, self.config.otp_ttl())
                    .await
                {
                    warn!("failed to restage pending signup: {restage}");
                }
                Err(err.into())
            }
        }
    }

    /// Find or create the account for an external identity.
    ///
    /// A newly created account gets exactly one welcome email; returning users
    /// only have `last_login` refreshed.
    ///
    /// # Errors
    /// `DuplicateAccount` when the identity's email already belongs to a
    /// different account, store errors otherwise.
    #[instrument(skip(self, identity), fields(external_id = %identity.external_id))]
    pub async fn reconcile_oauth(
        &self,
        provider: Provider,
        identity: ExternalIdentity,
    ) -> Result<Account, AuthError> {
        if let Some(account) = self.returning(provider, &identity.external_id).await? {
            return Ok(account);
        }

        let email = identity
            .email
            .as_deref()
            .map(password::normalize_email)
            .filter(|email| password::valid_email(email));
        let name = identity
            .name
            .filter(|name| !name.trim().is_empty())
            .or_else(|| email.as_ref().and_then(|e| e.split('@').next().map(str::to_string)))
            .unwrap_or_else(|| format!("{provider} user"));

        let inserted = self
            .accounts
            .insert(NewAccount {
                email,
                name,
                provider,
                external_id: Some(identity.external_id.clone()),
                avatar_url: identity.avatar_url,
                password_hash: None,
                last_login: Utc::now(),
            })
            .await;

        match inserted {
            Ok(account) => {
                info!(account_id = %account.id, %provider, "oauth account created");
                if let Some(email) = &account.email {
                    notify(
                        self.notifier.as_ref(),
                        EmailMessage::new(
                            email.clone(),
                            EmailTemplate::Welcome,
                            json!({ "name": account.name }),
                        ),
                    )
                    .await;
                }
                Ok(account)
            }
            // Lost a race with a concurrent first login for the same identity.
            Err(StoreError::Conflict) => self
                .returning(provider, &identity.external_id)
                .await?
                .ok_or(AuthError::DuplicateAccount),
            Err(err) => Err(err.into()),
        }
    }

    async fn returning(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> Result<Option<Account>, AuthError> {
        let Some(mut account) = self.accounts.find_by_external(provider, external_id).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        self.accounts.record_login(account.id, now).await?;
        account.last_login = now;
        Ok(Some(account))
    }

    /// Keep the presented session when it is live and owned by `account_id`,
    /// otherwise create one. Returns the new session token, if any.
    ///
    /// # Errors
    /// Returns store errors.
    pub async fn ensure_session(
        &self,
        account_id: Uuid,
        presented: Option<&str>,
        client: &ClientMeta,
    ) -> Result<Option<String>, AuthError> {
        if let Some(token) = presented {
            let current = self.sessions.find(token).await?;
            if current.is_some_and(|session| session.account_id == account_id) {
                return Ok(None);
            }
        }
        Ok(Some(self.sessions.create(account_id, client).await?))
    }
}
