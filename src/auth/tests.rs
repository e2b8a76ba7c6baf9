//! Flow tests for the auth service against in-memory stores.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::*;
use crate::{
    accounts::{AccountStore, MemoryAccountStore, NewAccount, Provider},
    notify::{EmailMessage, EmailTemplate, MemoryOutbox, Notifier},
    oauth::{pkce, ExternalIdentity, ProviderAdapter, ProviderError, ProviderRegistry},
    secrets::{MemorySecretStore, SecretStore},
    sessions::{ClientMeta, MemorySessionStore, SessionStore, TokenCodec},
};

struct ClosedNotifier;

#[async_trait]
impl Notifier for ClosedNotifier {
    async fn enqueue(&self, _message: EmailMessage) -> Result<()> {
        Err(anyhow!("queue closed"))
    }
}

/// Provider double returning a fixed identity and recording what it was given.
struct ScriptedProvider {
    provider: Provider,
    pkce: bool,
    identity: Mutex<Option<ExternalIdentity>>,
    exchanges: AtomicU32,
    last_verifier: Mutex<Option<String>>,
}

impl ScriptedProvider {
    fn new(provider: Provider, pkce: bool, identity: ExternalIdentity) -> Self {
        Self {
            provider,
            pkce,
            identity: Mutex::new(Some(identity)),
            exchanges: AtomicU32::new(0),
            last_verifier: Mutex::new(None),
        }
    }

    fn fail_next(&self) {
        if let Ok(mut identity) = self.identity.lock() {
            *identity = None;
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn uses_pkce(&self) -> bool {
        self.pkce
    }

    fn authorization_url(
        &self,
        state: &str,
        code_challenge: Option<&str>,
    ) -> Result<Url, ProviderError> {
        let mut params = vec![("state", state)];
        if let Some(challenge) = code_challenge {
            params.push(("code_challenge", challenge));
        }
        Url::parse_with_params("https://provider.test/authorize", &params)
            .map_err(|err| ProviderError::new(self.provider, err.to_string()))
    }

    async fn exchange_code(
        &self,
        _code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ExternalIdentity, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_verifier.lock() {
            *last = code_verifier.map(ToString::to_string);
        }
        self.identity
            .lock()
            .ok()
            .and_then(|identity| identity.clone())
            .ok_or_else(|| ProviderError::new(self.provider, "token endpoint returned 500"))
    }
}

struct Harness {
    service: AuthService,
    accounts: Arc<MemoryAccountStore>,
    sessions: Arc<MemorySessionStore>,
    secrets: Arc<MemorySecretStore>,
    notifier: Arc<MemoryOutbox>,
    google: Arc<ScriptedProvider>,
    x: Arc<ScriptedProvider>,
    tokens: TokenCodec,
}

fn google_identity() -> ExternalIdentity {
    ExternalIdentity {
        external_id: "g-123".to_string(),
        email: Some("G@Example.com".to_string()),
        name: Some("Gina".to_string()),
        avatar_url: Some("https://img.test/g.png".to_string()),
    }
}

fn config() -> AuthConfig {
    AuthConfig::new("https://auth.test").with_password_params(password::test_params())
}

fn harness_with(config: AuthConfig) -> Harness {
    let accounts = Arc::new(MemoryAccountStore::new());
    let sessions = Arc::new(MemorySessionStore::new(config.session_ttl()));
    let secrets = Arc::new(MemorySecretStore::new());
    let notifier = Arc::new(MemoryOutbox::new());
    let google = Arc::new(ScriptedProvider::new(Provider::Google, false, google_identity()));
    let x = Arc::new(ScriptedProvider::new(
        Provider::X,
        true,
        ExternalIdentity {
            external_id: "x-9".to_string(),
            email: None,
            name: Some("Xavier".to_string()),
            avatar_url: None,
        },
    ));
    let providers = ProviderRegistry::new()
        .with_adapter(google.clone())
        .with_adapter(x.clone());
    let tokens = TokenCodec::new(
        &SecretString::from("flow-test-secret".to_string()),
        config.access_token_ttl(),
    );
    let service = AuthService::new(
        config,
        tokens.clone(),
        AuthDeps {
            accounts: accounts.clone(),
            sessions: sessions.clone(),
            secrets: secrets.clone(),
            notifier: notifier.clone(),
            providers,
        },
    );
    Harness {
        service,
        accounts,
        sessions,
        secrets,
        notifier,
        google,
        x,
        tokens,
    }
}

fn harness() -> Harness {
    harness_with(config())
}

fn client() -> ClientMeta {
    ClientMeta {
        user_agent: Some("flow-test".to_string()),
        ip: Some("10.0.0.1".to_string()),
    }
}

fn signup_input(email: &str, password: &str, name: &str) -> SignupInput {
    SignupInput {
        email: Some(email.to_string()),
        password: Some(password.to_string()),
        name: Some(name.to_string()),
    }
}

impl Harness {
    async fn signed_up(&self, email: &str, password: &str) -> Result<Login> {
        self.service
            .signup(&signup_input(email, password, "Alice"))
            .await?;
        let otp = self
            .notifier
            .last_param(EmailTemplate::VerifyEmail, "otp")
            .await
            .context("verification code not sent")?;
        Ok(self
            .service
            .verify_email(Some(&otp), Some(email), &client())
            .await?)
    }

    async fn oauth_round_trip(&self, provider: Provider, session: Option<&str>) -> Result<Login> {
        let redirect = self.service.oauth_begin(provider).await?;
        Ok(self
            .service
            .oauth_callback(
                provider,
                Some("auth-code"),
                Some(&redirect.state),
                Some(&redirect.state),
                session,
                &client(),
            )
            .await?)
    }
}

#[tokio::test]
async fn signup_then_verify_creates_account_and_session() -> Result<()> {
    let h = harness();
    h.service
        .signup(&signup_input("a@x.com", "secret1", "A"))
        .await?;
    assert!(h.accounts.is_empty().await);
    assert_eq!(h.notifier.count(EmailTemplate::VerifyEmail).await, 1);

    let otp = h
        .notifier
        .last_param(EmailTemplate::VerifyEmail, "otp")
        .await
        .context("missing otp")?;
    let login = h
        .service
        .verify_email(Some(&otp), Some("a@x.com"), &client())
        .await?;

    assert_eq!(login.account.email.as_deref(), Some("a@x.com"));
    assert_eq!(login.account.name, "A");
    assert!((chrono::Utc::now() - login.account.last_login).num_seconds() < 5);
    assert_eq!(h.accounts.len().await, 1);
    assert_eq!(h.sessions.count_for(login.account.id).await, 1);
    assert_eq!(h.tokens.verify(&login.access_token), Ok(login.account.id));
    assert_eq!(h.notifier.count(EmailTemplate::Welcome).await, 1);

    let replay = h
        .service
        .verify_email(Some(&otp), Some("a@x.com"), &client())
        .await;
    assert!(matches!(replay, Err(AuthError::OtpInvalidOrExpired)));
    assert_eq!(h.accounts.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_confirmations_of_one_code_create_one_account() -> Result<()> {
    let h = harness();
    h.service
        .signup(&signup_input("race@x.com", "secret1", "R"))
        .await?;
    let otp = h
        .notifier
        .last_param(EmailTemplate::VerifyEmail, "otp")
        .await
        .context("missing otp")?;

    let meta = client();
    let (first, second) = tokio::join!(
        h.service
            .verify_email(Some(&otp), Some("race@x.com"), &meta),
        h.service
            .verify_email(Some(&otp), Some("race@x.com"), &meta),
    );
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|outcome| matches!(outcome, Err(AuthError::OtpInvalidOrExpired))));
    assert_eq!(h.accounts.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn confirmation_after_email_was_taken_is_duplicate() -> Result<()> {
    let h = harness();
    h.service
        .signup(&signup_input("taken@x.com", "secret1", "T"))
        .await?;
    let otp = h
        .notifier
        .last_param(EmailTemplate::VerifyEmail, "otp")
        .await
        .context("missing otp")?;
    h.accounts
        .insert(NewAccount {
            email: Some("taken@x.com".to_string()),
            name: "Other".to_string(),
            provider: Provider::Google,
            external_id: Some("g-taken".to_string()),
            avatar_url: None,
            password_hash: None,
            last_login: chrono::Utc::now(),
        })
        .await?;

    let verified = h
        .service
        .verify_email(Some(&otp), Some("taken@x.com"), &client())
        .await;
    assert!(matches!(verified, Err(AuthError::DuplicateAccount)));
    assert_eq!(h.secrets.count_prefix("otp:taken@x.com:").await, 0);
    Ok(())
}

#[tokio::test]
async fn staged_signup_never_holds_plaintext_password() -> Result<()> {
    let h = harness();
    h.service
        .signup(&signup_input("p@x.com", "plaintext-secret", "P"))
        .await?;
    let otp = h
        .notifier
        .last_param(EmailTemplate::VerifyEmail, "otp")
        .await
        .context("missing otp")?;
    let staged = h
        .secrets
        .get(&format!("otp:p@x.com:{otp}"))
        .await?
        .context("nothing staged")?;
    assert!(!staged.contains("plaintext-secret"));
    assert!(staged.contains("$argon2id$"));
    Ok(())
}

#[tokio::test]
async fn signup_validation_and_duplicates() -> Result<()> {
    let h = harness();
    for input in [
        SignupInput::default(),
        signup_input("not-an-email", "secret1", "A"),
        signup_input("a@x.com", "short", "A"),
        signup_input("a@x.com", "secret1", "  "),
    ] {
        assert!(matches!(
            h.service.signup(&input).await,
            Err(AuthError::Validation(_))
        ));
    }

    h.signed_up("dup@x.com", "secret1").await?;
    let again = h
        .service
        .signup(&signup_input(" DUP@x.com ", "secret1", "B"))
        .await;
    assert!(matches!(again, Err(AuthError::DuplicateAccount)));
    Ok(())
}

#[tokio::test]
async fn idempotent_signup_stages_and_sends_once() -> Result<()> {
    let h = harness();
    let input = signup_input("idem@x.com", "secret1", "I");
    let run = || async {
        h.service.signup(&input).await?;
        Ok((
            Outcome {
                status: 200,
                body: r#"{"success":true,"message":"Verification code sent to email"}"#.to_string(),
            },
            (),
        ))
    };

    let first = h.service.idempotency().run("signup", Some("key-1"), run).await?;
    let second = h.service.idempotency().run("signup", Some("key-1"), run).await?;

    let Guarded::Fresh(first, ()) = first else {
        return Err(anyhow!("first call should execute"));
    };
    let Guarded::Replayed(second) = second else {
        return Err(anyhow!("second call should replay"));
    };
    assert_eq!(first, second);
    assert_eq!(h.secrets.count_prefix("otp:idem@x.com:").await, 1);
    assert_eq!(h.notifier.count(EmailTemplate::VerifyEmail).await, 1);
    Ok(())
}

#[tokio::test]
async fn login_session_passes_check_auth() -> Result<()> {
    let h = harness();
    let created = h.signed_up("l@x.com", "secret1").await?;

    let login = h
        .service
        .login(Some("L@x.com"), Some("secret1"), &client())
        .await?;
    let session = login.session_token.context("login must issue a session")?;
    assert_eq!(login.account.id, created.account.id);

    let account = h.service.check_auth(login.account.id, Some(&session)).await?;
    assert_eq!(account.id, created.account.id);
    Ok(())
}

#[tokio::test]
async fn wrong_password_and_unknown_email_are_indistinguishable() -> Result<()> {
    let h = harness();
    h.signed_up("w@x.com", "secret1").await?;

    let wrong = h
        .service
        .login(Some("w@x.com"), Some("nope-nope"), &client())
        .await
        .err()
        .context("wrong password must fail")?;
    let unknown = h
        .service
        .login(Some("ghost@x.com"), Some("secret1"), &client())
        .await
        .err()
        .context("unknown email must fail")?;

    assert!(matches!(wrong, AuthError::InvalidCredentials));
    assert!(matches!(unknown, AuthError::InvalidCredentials));
    assert_eq!(wrong.public_message(), unknown.public_message());
    assert_eq!(wrong.status(), unknown.status());
    Ok(())
}

#[tokio::test]
async fn every_failed_login_pays_one_password_verification() -> Result<()> {
    let h = harness();
    h.signed_up("v@x.com", "secret1").await?;
    h.accounts
        .insert(NewAccount {
            email: Some("social@x.com".to_string()),
            name: "Social".to_string(),
            provider: Provider::Google,
            external_id: Some("g-1".to_string()),
            avatar_url: None,
            password_hash: None,
            last_login: chrono::Utc::now(),
        })
        .await?;

    for email in ["v@x.com", "ghost@x.com", "social@x.com"] {
        let before = password::verification_count();
        let result = h
            .service
            .login(Some(email), Some("nope-nope"), &client())
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)), "{email}");
        assert_eq!(password::verification_count() - before, 1, "{email}");
    }
    Ok(())
}

#[tokio::test]
async fn logout_invalidates_session_and_is_idempotent() -> Result<()> {
    let h = harness();
    let login = h.signed_up("o@x.com", "secret1").await?;
    let session = login.session_token.context("session")?;

    h.service.logout(Some(&session)).await?;
    h.service.logout(Some(&session)).await?;
    h.service.logout(None).await?;

    let check = h.service.check_auth(login.account.id, Some(&session)).await;
    assert!(matches!(check, Err(AuthError::SessionExpired)));
    Ok(())
}

#[tokio::test]
async fn logout_other_sessions_requires_password() -> Result<()> {
    let h = harness();
    let first = h.signed_up("m@x.com", "secret1").await?;
    let current = first.session_token.context("session")?;
    for _ in 0..2 {
        h.service
            .login(Some("m@x.com"), Some("secret1"), &client())
            .await?;
    }
    assert_eq!(h.sessions.count_for(first.account.id).await, 3);

    let wrong = h
        .service
        .logout_other_sessions(&first.account, Some("bad-password"), Some(&current))
        .await;
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
    assert_eq!(h.sessions.count_for(first.account.id).await, 3);

    let revoked = h
        .service
        .logout_other_sessions(&first.account, Some("secret1"), Some(&current))
        .await?;
    assert_eq!(revoked, 2);
    assert_eq!(h.sessions.count_for(first.account.id).await, 1);
    assert!(h.sessions.find(&current).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn authenticate_renews_missing_or_expired_access_token() -> Result<()> {
    let h = harness();
    let login = h.signed_up("r@x.com", "secret1").await?;
    let session = login.session_token.context("session")?;

    let fresh = h
        .service
        .authenticate(Some(&login.access_token), Some(&session))
        .await?;
    assert!(fresh.renewed_access_token.is_none());

    let expired = h
        .tokens
        .issue_at(login.account.id, chrono::Utc::now().timestamp() - 3600)?;
    let renewed = h
        .service
        .authenticate(Some(&expired), Some(&session))
        .await?;
    let token = renewed.renewed_access_token.context("expected renewal")?;
    assert_eq!(h.tokens.verify(&token), Ok(login.account.id));

    let missing = h.service.authenticate(None, Some(&session)).await?;
    assert!(missing.renewed_access_token.is_some());

    h.service.logout(Some(&session)).await?;
    let dead = h.service.authenticate(Some(&expired), Some(&session)).await;
    assert!(matches!(dead, Err(AuthError::SessionExpired)));
    Ok(())
}

#[tokio::test]
async fn authenticate_rejects_forged_token_and_renewal_without_session() -> Result<()> {
    let h = harness();
    let login = h.signed_up("f@x.com", "secret1").await?;
    let session = login.session_token.context("session")?;

    let forged = TokenCodec::new(
        &SecretString::from("attacker".to_string()),
        Duration::from_secs(900),
    )
    .issue(login.account.id)?;
    let result = h.service.authenticate(Some(&forged), Some(&session)).await;
    assert!(matches!(result, Err(AuthError::InvalidAccessToken)));

    let expired = h
        .tokens
        .issue_at(login.account.id, chrono::Utc::now().timestamp() - 3600)?;
    let result = h.service.authenticate(Some(&expired), None).await;
    assert!(matches!(result, Err(AuthError::NoSession)));

    let result = h.service.authenticate(None, Some("")).await;
    assert!(matches!(result, Err(AuthError::NoSession)));
    Ok(())
}

#[tokio::test]
async fn valid_access_token_needs_no_session() -> Result<()> {
    let h = harness();
    let login = h.signed_up("b@x.com", "secret1").await?;
    let session = login.session_token.context("session")?;

    let bearer = h
        .service
        .authenticate(Some(&login.access_token), None)
        .await?;
    assert_eq!(bearer.account.id, login.account.id);
    assert!(bearer.renewed_access_token.is_none());

    // check-auth still insists on a live session.
    let check = h.service.check_auth(login.account.id, None).await;
    assert!(matches!(check, Err(AuthError::SessionExpired)));

    // Without a current session every session counts as "other".
    let revoked = h
        .service
        .logout_other_sessions(&bearer.account, Some("secret1"), None)
        .await?;
    assert_eq!(revoked, 1);
    assert!(h.sessions.find(&session).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn check_auth_rejects_foreign_session() -> Result<()> {
    let h = harness();
    let alice = h.signed_up("alice@x.com", "secret1").await?;
    let bob = h.signed_up("bob@x.com", "secret1").await?;
    let bob_session = bob.session_token.context("session")?;

    let result = h.service.check_auth(alice.account.id, Some(&bob_session)).await;
    assert!(matches!(result, Err(AuthError::SessionExpired)));

    let result = h.service.check_auth(Uuid::new_v4(), Some(&bob_session)).await;
    assert!(matches!(result, Err(AuthError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn reset_password_swaps_credentials_once() -> Result<()> {
    let h = harness();
    h.signed_up("reset@x.com", "secret1").await?;

    let missing = h.service.forgot_password(Some("nobody@x.com")).await;
    assert!(matches!(missing, Err(AuthError::NotFound(_))));

    h.service.forgot_password(Some("reset@x.com")).await?;
    let url = h
        .notifier
        .last_param(EmailTemplate::PasswordReset, "reset_url")
        .await
        .context("reset link not sent")?;
    let token = url
        .strip_prefix("https://auth.test/api/auth/reset-password/")
        .context("unexpected reset url")?
        .to_string();

    h.service.reset_password(&token, Some("brand-new")).await?;
    assert_eq!(h.notifier.count(EmailTemplate::PasswordResetSuccess).await, 1);

    let old = h
        .service
        .login(Some("reset@x.com"), Some("secret1"), &client())
        .await;
    assert!(matches!(old, Err(AuthError::InvalidCredentials)));
    h.service
        .login(Some("reset@x.com"), Some("brand-new"), &client())
        .await?;

    let reused = h.service.reset_password(&token, Some("third-one")).await;
    assert!(matches!(reused, Err(AuthError::InvalidOrExpiredToken)));
    Ok(())
}

#[tokio::test]
async fn expired_reset_token_is_rejected() -> Result<()> {
    let h = harness_with(config().with_reset_token_ttl(Duration::ZERO));
    h.signed_up("late@x.com", "secret1").await?;
    h.service.forgot_password(Some("late@x.com")).await?;
    let url = h
        .notifier
        .last_param(EmailTemplate::PasswordReset, "reset_url")
        .await
        .context("reset link not sent")?;
    let token = url.rsplit('/').next().context("token")?.to_string();

    let result = h.service.reset_password(&token, Some("brand-new")).await;
    assert!(matches!(result, Err(AuthError::InvalidOrExpiredToken)));
    h.service
        .login(Some("late@x.com"), Some("secret1"), &client())
        .await?;
    Ok(())
}

#[tokio::test]
async fn oauth_first_login_creates_account_and_welcomes_once() -> Result<()> {
    let h = harness();
    let first = h.oauth_round_trip(Provider::Google, None).await?;
    assert_eq!(first.account.provider, Provider::Google);
    assert_eq!(first.account.external_id.as_deref(), Some("g-123"));
    assert_eq!(first.account.email.as_deref(), Some("g@example.com"));
    assert!(first.session_token.is_some());
    assert_eq!(h.notifier.count(EmailTemplate::Welcome).await, 1);

    let session = first.session_token.clone();
    let second = h
        .oauth_round_trip(Provider::Google, session.as_deref())
        .await?;
    assert_eq!(second.account.id, first.account.id);
    assert!(second.session_token.is_none(), "live session is kept");
    assert_eq!(h.accounts.len().await, 1);
    assert_eq!(h.notifier.count(EmailTemplate::Welcome).await, 1);
    assert_eq!(h.google.exchanges.load(Ordering::SeqCst), 2);

    let third = h.oauth_round_trip(Provider::Google, None).await?;
    assert!(third.session_token.is_some());
    assert_eq!(h.sessions.count_for(first.account.id).await, 2);
    Ok(())
}

#[tokio::test]
async fn oauth_x_round_trips_pkce_verifier() -> Result<()> {
    let h = harness();
    let redirect = h.service.oauth_begin(Provider::X).await?;
    let challenge = redirect
        .url
        .query_pairs()
        .find(|(key, _)| key == "code_challenge")
        .map(|(_, value)| value.into_owned())
        .context("x must send a challenge")?;

    let login = h
        .service
        .oauth_callback(
            Provider::X,
            Some("code"),
            Some(&redirect.state),
            Some(&redirect.state),
            None,
            &client(),
        )
        .await?;
    assert!(login.account.email.is_none());
    assert_eq!(login.account.name, "Xavier");
    // Email-less identities get no welcome email.
    assert_eq!(h.notifier.count(EmailTemplate::Welcome).await, 0);

    let verifier = h
        .x
        .last_verifier
        .lock()
        .map_err(|_| anyhow!("poisoned"))?
        .clone()
        .context("verifier not forwarded")?;
    assert_eq!(pkce::challenge_s256(&verifier), challenge);
    Ok(())
}

#[tokio::test]
async fn oauth_state_must_match_and_is_single_use() -> Result<()> {
    let h = harness();
    let redirect = h.service.oauth_begin(Provider::Google).await?;

    let mismatch = h
        .service
        .oauth_callback(
            Provider::Google,
            Some("code"),
            Some(&redirect.state),
            Some("other-state"),
            None,
            &client(),
        )
        .await;
    assert!(matches!(mismatch, Err(AuthError::InvalidState)));

    let missing_cookie = h
        .service
        .oauth_callback(
            Provider::Google,
            Some("code"),
            Some(&redirect.state),
            None,
            None,
            &client(),
        )
        .await;
    assert!(matches!(missing_cookie, Err(AuthError::InvalidState)));

    h.service
        .oauth_callback(
            Provider::Google,
            Some("code"),
            Some(&redirect.state),
            Some(&redirect.state),
            None,
            &client(),
        )
        .await?;
    let replay = h
        .service
        .oauth_callback(
            Provider::Google,
            Some("code"),
            Some(&redirect.state),
            Some(&redirect.state),
            None,
            &client(),
        )
        .await;
    assert!(matches!(replay, Err(AuthError::InvalidState)));

    // State minted for one provider cannot complete another.
    let google = h.service.oauth_begin(Provider::Google).await?;
    let cross = h
        .service
        .oauth_callback(
            Provider::X,
            Some("code"),
            Some(&google.state),
            Some(&google.state),
            None,
            &client(),
        )
        .await;
    assert!(matches!(cross, Err(AuthError::InvalidState)));
    assert_eq!(h.google.exchanges.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn oauth_provider_failure_and_disabled_provider() -> Result<()> {
    let h = harness();
    h.google.fail_next();
    let result = h.oauth_round_trip(Provider::Google, None).await;
    let err = result.err().context("provider failure must surface")?;
    assert!(matches!(
        err.downcast_ref::<AuthError>(),
        Some(AuthError::Provider(_))
    ));
    assert!(h.accounts.is_empty().await);

    let disabled = h.service.oauth_begin(Provider::Facebook).await;
    assert!(matches!(disabled, Err(AuthError::NotFound("provider"))));
    Ok(())
}

#[tokio::test]
async fn oauth_email_clash_is_duplicate_account() -> Result<()> {
    let h = harness();
    h.accounts
        .insert(NewAccount {
            email: Some("g@example.com".to_string()),
            name: "Local G".to_string(),
            provider: Provider::Local,
            external_id: None,
            avatar_url: None,
            password_hash: None,
            last_login: chrono::Utc::now(),
        })
        .await?;
    let err = h
        .oauth_round_trip(Provider::Google, None)
        .await
        .err()
        .context("clash must fail")?;
    assert!(matches!(
        err.downcast_ref::<AuthError>(),
        Some(AuthError::DuplicateAccount)
    ));
    Ok(())
}

#[tokio::test]
async fn notification_failures_do_not_fail_flows() -> Result<()> {
    let config = config();
    let tokens = TokenCodec::new(
        &SecretString::from("s".to_string()),
        config.access_token_ttl(),
    );
    let secrets = Arc::new(MemorySecretStore::new());
    let service = AuthService::new(
        config.clone(),
        tokens,
        AuthDeps {
            accounts: Arc::new(MemoryAccountStore::new()),
            sessions: Arc::new(MemorySessionStore::new(config.session_ttl())),
            secrets: secrets.clone(),
            notifier: Arc::new(ClosedNotifier),
            providers: ProviderRegistry::new(),
        },
    );
    service
        .signup(&signup_input("quiet@x.com", "secret1", "Q"))
        .await?;
    assert_eq!(secrets.count_prefix("otp:quiet@x.com:").await, 1);
    Ok(())
}
