//! Request-level auth flows.
//!
//! Each method is one flow: it validates input, talks to the stores through
//! [`Reconciler`] or directly, issues credentials and enqueues emails. Email
//! dispatch is fire-and-forget; a failed enqueue is logged and never fails the
//! flow that triggered it.

use chrono::Utc;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;
use uuid::Uuid;

use super::{
    password,
    reconcile::{notify, Reconciler},
    AuthConfig, AuthError, IdempotencyGuard,
};
use crate::{
    accounts::{Account, AccountStore, Provider},
    notify::{EmailMessage, EmailTemplate, Notifier},
    oauth::{pkce, ProviderRegistry},
    secrets::SecretStore,
    sessions::{ClientMeta, SessionStore, TokenCodec, TokenError},
    store::hash_secret,
};

/// Process-wide collaborators, created once at startup and injected.
#[derive(Clone)]
pub struct AuthDeps {
    pub accounts: Arc<dyn AccountStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub notifier: Arc<dyn Notifier>,
    pub providers: ProviderRegistry,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignupInput {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

/// Credentials issued by a login-like flow.
#[derive(Debug)]
pub struct Login {
    pub account: Account,
    pub access_token: String,
    /// `None` when an existing live session was kept.
    pub session_token: Option<String>,
}

/// Result of authenticating a protected request.
#[derive(Debug)]
pub struct Authenticated {
    pub account: Account,
    /// Set when the access token was missing or expired and got renewed.
    pub renewed_access_token: Option<String>,
}

#[derive(Debug)]
pub struct OAuthRedirect {
    pub url: Url,
    pub state: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingAuthorization {
    provider: Provider,
    code_verifier: Option<String>,
}

fn oauth_state_key(state: &str) -> String {
    format!("oauth:{state}")
}

fn required<'a>(value: Option<&'a str>, message: &str) -> Result<&'a str, AuthError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AuthError::validation(message))
}

fn validated_email(email: Option<&str>) -> Result<String, AuthError> {
    let email = password::normalize_email(required(email, "please provide email")?);
    if !password::valid_email(&email) {
        return Err(AuthError::validation("please provide a valid email"));
    }
    Ok(email)
}

fn validated_password(value: Option<&str>) -> Result<&str, AuthError> {
    let value = required(value, "please provide password")?;
    if value.chars().count() < password::MIN_PASSWORD_LEN {
        return Err(AuthError::validation(format!(
            "password must be at least {} characters",
            password::MIN_PASSWORD_LEN
        )));
    }
    Ok(value)
}

#[derive(Clone)]
pub struct AuthService {
    config: AuthConfig,
    tokens: TokenCodec,
    deps: AuthDeps,
    reconciler: Reconciler,
    idempotency: IdempotencyGuard,
    // Verified against when login finds no password hash.
    dummy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new(config: AuthConfig, tokens: TokenCodec, deps: AuthDeps) -> Self {
        let reconciler = Reconciler::new(
            deps.accounts.clone(),
            deps.sessions.clone(),
            deps.secrets.clone(),
            deps.notifier.clone(),
            config.clone(),
        );
        let idempotency = IdempotencyGuard::new(deps.secrets.clone(), config.idempotency_ttl());
        Self {
            config,
            tokens,
            deps,
            reconciler,
            idempotency,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    fn dummy_hash(&self) -> Result<&str, AuthError> {
        let hash = self.dummy_hash.get_or_try_init(|| {
            password::hash_password(&Uuid::new_v4().to_string(), self.config.password_params())
        })?;
        Ok(hash.as_str())
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.idempotency
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.deps.providers
    }

    #[must_use]
    pub fn deps(&self) -> &AuthDeps {
        &self.deps
    }

    async fn notify(&self, message: EmailMessage) {
        notify(self.deps.notifier.as_ref(), message).await;
    }

    /// Validate, stage the signup and email the verification code.
    ///
    /// # Errors
    /// `Validation` for missing/malformed fields, `DuplicateAccount` when the
    /// email is already registered.
    #[instrument(skip_all)]
    pub async fn signup(&self, input: &SignupInput) -> Result<(), AuthError> {
        let email = validated_email(input.email.as_deref())?;
        let password = validated_password(input.password.as_deref())?;
        let name = required(input.name.as_deref(), "please provide name")?.trim();

        let otp = self
            .reconciler
            .stage_local_signup(&email, name, password)
            .await?;
        self.notify(EmailMessage::new(
            email,
            EmailTemplate::VerifyEmail,
            json!({ "name": name, "otp": otp }),
        ))
        .await;
        Ok(())
    }

    /// Confirm the emailed code, create the account and log it in.
    ///
    /// # Errors
    /// `OtpInvalidOrExpired` when no signup is staged for `(otp, email)`.
    #[instrument(skip_all)]
    pub async fn verify_email(
        &self,
        otp: Option<&str>,
        email: Option<&str>,
        client: &ClientMeta,
    ) -> Result<Login, AuthError> {
        let otp = required(otp, "please provide code")?.trim();
        let email = validated_email(email)?;

        let account = self.reconciler.materialize_local_account(otp, &email).await?;
        let session_token = self.deps.sessions.create(account.id, client).await?;
        let access_token = self.tokens.issue(account.id)?;

        if let Some(email) = &account.email {
            self.notify(EmailMessage::new(
                email.clone(),
                EmailTemplate::Welcome,
                json!({ "name": account.name }),
            ))
            .await;
        }
        Ok(Login {
            account,
            access_token,
            session_token: Some(session_token),
        })
    }

    /// Password login.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown email, an account without a
    /// password, or a wrong password alike.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        email: Option<&str>,
        password: Option<&str>,
        client: &ClientMeta,
    ) -> Result<Login, AuthError> {
        let email = password::normalize_email(required(email, "please provide email and password")?);
        let password = required(password, "please provide email and password")?;

        let account = self.deps.accounts.find_by_email(&email).await?;
        let matches = match account.as_ref().and_then(Account::password_hash) {
            Some(hash) => password::verify_password(password, hash),
            None => {
                // Unknown emails and password-less accounts cost a full verification too.
                let _ = password::verify_password(password, self.dummy_hash()?);
                false
            }
        };
        let Some(mut account) = account.filter(|_| matches) else {
            return Err(AuthError::InvalidCredentials);
        };

        let now = Utc::now();
        self.deps.accounts.record_login(account.id, now).await?;
        account.last_login = now;

        let session_token = self.deps.sessions.create(account.id, client).await?;
        let access_token = self.tokens.issue(account.id)?;
        info!(account_id = %account.id, "login succeeded");
        Ok(Login {
            account,
            access_token,
            session_token: Some(session_token),
        })
    }

    /// Drop the presented session. Unknown or missing sessions are not an error.
    ///
    /// # Errors
    /// Returns store errors.
    #[instrument(skip_all)]
    pub async fn logout(&self, session_token: Option<&str>) -> Result<(), AuthError> {
        if let Some(token) = session_token {
            self.deps.sessions.delete(token).await?;
        }
        Ok(())
    }

    /// Resolve the caller of a protected request.
    ///
    /// A valid access token is used as is. A missing or expired one is renewed
    /// once from the presented session, which must then be live.
    ///
    /// # Errors
    /// `InvalidAccessToken` for a forged or malformed token, `NoSession` when
    /// renewal is needed without a session credential, `SessionExpired` when
    /// renewal finds no live session.
    #[instrument(skip_all)]
    pub async fn authenticate(
        &self,
        access_token: Option<&str>,
        session_token: Option<&str>,
    ) -> Result<Authenticated, AuthError> {
        let verified = access_token
            .filter(|token| !token.is_empty())
            .map(|token| self.tokens.verify(token));
        match verified {
            Some(Ok(account_id)) => {
                let account = self
                    .deps
                    .accounts
                    .find_by_id(account_id)
                    .await?
                    .ok_or(AuthError::NotFound("user"))?;
                Ok(Authenticated {
                    account,
                    renewed_access_token: None,
                })
            }
            Some(Err(TokenError::Invalid)) => Err(AuthError::InvalidAccessToken),
            Some(Err(TokenError::Expired)) | None => {
                let session_token = session_token
                    .filter(|token| !token.is_empty())
                    .ok_or(AuthError::NoSession)?;
                let session = self
                    .deps
                    .sessions
                    .find(session_token)
                    .await?
                    .ok_or(AuthError::SessionExpired)?;
                let account = self
                    .deps
                    .accounts
                    .find_by_id(session.account_id)
                    .await?
                    .ok_or(AuthError::NotFound("user"))?;
                let renewed = self.tokens.issue(account.id)?;
                info!(account_id = %account.id, "access token renewed");
                Ok(Authenticated {
                    account,
                    renewed_access_token: Some(renewed),
                })
            }
        }
    }

    /// Confirm the account still exists and the presented session belongs to it.
    ///
    /// # Errors
    /// `NotFound` for a deleted account, `SessionExpired` otherwise.
    #[instrument(skip(self, session_token))]
    pub async fn check_auth(
        &self,
        account_id: Uuid,
        session_token: Option<&str>,
    ) -> Result<Account, AuthError> {
        let account = self
            .deps
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound("user"))?;
        let Some(token) = session_token else {
            return Err(AuthError::SessionExpired);
        };
        match self.deps.sessions.find(token).await? {
            Some(session) if session.account_id == account_id => Ok(account),
            _ => Err(AuthError::SessionExpired),
        }
    }

    /// Revoke every other session after re-confirming the password. Without a
    /// presented session (bearer-only callers) every session is revoked.
    ///
    /// # Errors
    /// `InvalidCredentials` on a wrong password (nothing is deleted).
    #[instrument(skip_all, fields(account_id = %account.id))]
    pub async fn logout_other_sessions(
        &self,
        account: &Account,
        password: Option<&str>,
        session_token: Option<&str>,
    ) -> Result<u64, AuthError> {
        let password = required(password, "please provide password")?;
        let matches = account
            .password_hash()
            .is_some_and(|hash| password::verify_password(password, hash));
        if !matches {
            return Err(AuthError::InvalidCredentials);
        }
        let revoked = self
            .deps
            .sessions
            .delete_all_except(account.id, session_token)
            .await?;
        info!(revoked, "other sessions revoked");
        Ok(revoked)
    }

    /// Issue a reset token and email the reset link.
    ///
    /// # Errors
    /// `NotFound` when no local account uses the email.
    #[instrument(skip_all)]
    pub async fn forgot_password(&self, email: Option<&str>) -> Result<(), AuthError> {
        let email = validated_email(email)?;
        let account = self
            .deps
            .accounts
            .find_by_email(&email)
            .await?
            .filter(|account| account.provider == Provider::Local)
            .ok_or(AuthError::NotFound("user"))?;

        let token = password::generate_reset_token()?;
        let ttl = chrono::Duration::from_std(self.config.reset_token_ttl())
            .map_err(|err| anyhow::anyhow!("invalid reset token ttl: {err}"))?;
        self.deps
            .accounts
            .set_reset_token(account.id, &hash_secret(&token), Utc::now() + ttl)
            .await?;

        self.notify(EmailMessage::new(
            email,
            EmailTemplate::PasswordReset,
            json!({ "name": account.name, "reset_url": self.config.reset_url(&token) }),
        ))
        .await;
        Ok(())
    }

    /// Set a new password using an emailed reset token.
    ///
    /// # Errors
    /// `InvalidOrExpiredToken` when no account holds this unexpired token.
    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: Option<&str>,
    ) -> Result<(), AuthError> {
        let token = required(Some(token), "please provide token")?;
        let new_password = validated_password(new_password)?;
        let password_hash = password::hash_password(new_password, self.config.password_params())?;

        let account = self
            .deps
            .accounts
            .consume_reset_token(&hash_secret(token), &password_hash)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        info!(account_id = %account.id, "password reset");

        if let Some(email) = &account.email {
            self.notify(EmailMessage::new(
                email.clone(),
                EmailTemplate::PasswordResetSuccess,
                json!({ "name": account.name }),
            ))
            .await;
        }
        Ok(())
    }

    /// Start an authorization request: stage `state` (and PKCE verifier) and
    /// return the provider URL to redirect to.
    ///
    /// # Errors
    /// `NotFound` when the provider is not enabled.
    #[instrument(skip(self))]
    pub async fn oauth_begin(&self, provider: Provider) -> Result<OAuthRedirect, AuthError> {
        let adapter = self
            .deps
            .providers
            .get(provider)
            .ok_or(AuthError::NotFound("provider"))?;

        let state = pkce::generate_state()?;
        let code_verifier = if adapter.uses_pkce() {
            Some(pkce::generate_verifier()?)
        } else {
            None
        };
        let challenge = code_verifier.as_deref().map(pkce::challenge_s256);
        let url = adapter.authorization_url(&state, challenge.as_deref())?;

        let pending = serde_json::to_string(&PendingAuthorization {
            provider,
            code_verifier,
        })
        .map_err(anyhow::Error::from)?;
        self.deps
            .secrets
            .set_with_ttl(&oauth_state_key(&state), &pending, self.config.oauth_state_ttl())
            .await?;
        Ok(OAuthRedirect { url, state })
    }

    /// Finish an authorization request and log the identity in.
    ///
    /// The `state` from the query must equal the one in the browser cookie and
    /// must still be staged for this provider; it is consumed either way.
    ///
    /// # Errors
    /// `InvalidState` on any state mismatch, `ProviderError` when the code
    /// exchange fails, `DuplicateAccount` on an email clash.
    #[instrument(skip(self, code, query_state, cookie_state, session_token, client))]
    pub async fn oauth_callback(
        &self,
        provider: Provider,
        code: Option<&str>,
        query_state: Option<&str>,
        cookie_state: Option<&str>,
        session_token: Option<&str>,
        client: &ClientMeta,
    ) -> Result<Login, AuthError> {
        let adapter = self
            .deps
            .providers
            .get(provider)
            .ok_or(AuthError::NotFound("provider"))?;

        let state = match (query_state, cookie_state) {
            (Some(query), Some(cookie)) if !query.is_empty() && query == cookie => query,
            _ => return Err(AuthError::InvalidState),
        };
        let raw = self
            .deps
            .secrets
            .take(&oauth_state_key(state))
            .await?
            .ok_or(AuthError::InvalidState)?;
        let pending: PendingAuthorization =
            serde_json::from_str(&raw).map_err(|_| AuthError::InvalidState)?;
        if pending.provider != provider {
            return Err(AuthError::InvalidState);
        }

        let code = required(code, "missing authorization code")?;
        let identity = adapter
            .exchange_code(code, pending.code_verifier.as_deref())
            .await?;
        let account = self.reconciler.reconcile_oauth(provider, identity).await?;
        let session_token = self
            .reconciler
            .ensure_session(account.id, session_token, client)
            .await?;
        let access_token = self.tokens.issue(account.id)?;
        Ok(Login {
            account,
            access_token,
            session_token,
        })
    }
}
