//! End-to-end HTTP flows against the in-memory stores.

use anyhow::{anyhow, Result};
use authgate::{
    accounts::{MemoryAccountStore, Provider},
    api::{self, AppState},
    auth::{AuthConfig, AuthDeps, AuthService},
    notify::{EmailTemplate, MemoryOutbox},
    oauth::{ExternalIdentity, ProviderAdapter, ProviderError, ProviderRegistry},
    secrets::MemorySecretStore,
    sessions::{MemorySessionStore, TokenCodec},
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;
use url::Url;

struct StubGoogle;

#[async_trait::async_trait]
impl ProviderAdapter for StubGoogle {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorization_url(
        &self,
        state: &str,
        _code_challenge: Option<&str>,
    ) -> Result<Url, ProviderError> {
        Url::parse_with_params("https://accounts.test/auth", &[("state", state)])
            .map_err(|err| ProviderError::new(Provider::Google, err.to_string()))
    }

    async fn exchange_code(
        &self,
        code: &str,
        _code_verifier: Option<&str>,
    ) -> Result<ExternalIdentity, ProviderError> {
        Ok(ExternalIdentity {
            external_id: format!("google-{code}"),
            email: Some("stub@example.com".to_string()),
            ..ExternalIdentity::default()
        })
    }
}

struct TestApp {
    router: Router,
    outbox: Arc<MemoryOutbox>,
}

fn test_app() -> TestApp {
    test_app_with(ProviderRegistry::new())
}

fn test_app_with(providers: ProviderRegistry) -> TestApp {
    let outbox = Arc::new(MemoryOutbox::new());
    let session_ttl = Duration::from_secs(3600);
    let params = argon2::Params::new(argon2::Params::MIN_M_COST, 1, 1, None).unwrap_or_default();
    let config = AuthConfig::new("http://auth.test")
        .with_session_ttl(session_ttl)
        .with_password_params(params);
    let deps = AuthDeps {
        accounts: Arc::new(MemoryAccountStore::new()),
        sessions: Arc::new(MemorySessionStore::new(session_ttl)),
        secrets: Arc::new(MemorySecretStore::new()),
        notifier: outbox.clone(),
        providers,
    };
    let tokens = TokenCodec::new(
        &SecretString::from("integration-secret".to_string()),
        config.access_token_ttl(),
    );
    let state = AppState::new(AuthService::new(config, tokens, deps));
    TestApp {
        router: api::app(state, None),
        outbox,
    }
}

struct JsonRequest {
    request: axum::http::request::Builder,
    body: Vec<u8>,
}

impl JsonRequest {
    fn header(mut self, name: &str, value: &str) -> Self {
        self.request = self.request.header(name, value);
        self
    }

    fn build(self) -> Result<Request<Body>> {
        Ok(self.request.body(Body::from(self.body))?)
    }
}

fn json_request(method: Method, uri: &str, body: &Value) -> Result<JsonRequest> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    Ok(JsonRequest {
        request,
        body: serde_json::to_vec(body)?,
    })
}

async fn send(app: &TestApp, request: Request<Body>) -> Result<Response> {
    Ok(app.router.clone().oneshot(request).await?)
}

async fn body_bytes(response: Response) -> Result<Vec<u8>> {
    Ok(to_bytes(response.into_body(), usize::MAX).await?.to_vec())
}

async fn body_json(response: Response) -> Result<Value> {
    Ok(serde_json::from_slice(&body_bytes(response).await?)?)
}

/// `name=value` pairs from every `Set-Cookie` header, ready for a `Cookie` header.
fn cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::to_string)
        .collect()
}

fn cookie_value<'a>(pairs: &'a [String], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

async fn signup(app: &TestApp, email: &str, key: &str) -> Result<Response> {
    let request = json_request(
        Method::POST,
        "/api/auth/signup",
        &json!({ "email": email, "password": "secret1", "name": "Ada" }),
    )?
    .header("idempotency-key", key)
    .build()?;
    send(app, request).await
}

/// Sign up and verify, returning the cookies set by verification.
async fn registered(app: &TestApp, email: &str) -> Result<Vec<String>> {
    signup(app, email, &format!("signup-{email}")).await?;
    let otp = app
        .outbox
        .last_param(EmailTemplate::VerifyEmail, "otp")
        .await
        .ok_or_else(|| anyhow!("no verification email"))?;
    let request = json_request(
        Method::POST,
        "/api/auth/verify-email",
        &json!({ "otp": otp, "email": email }),
    )?
    .header("idempotency-key", &format!("verify-{email}"))
    .build()?;
    let response = send(app, request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(cookies(&response))
}

#[tokio::test]
async fn signup_requires_idempotency_key() -> Result<()> {
    let app = test_app();
    let request = json_request(
        Method::POST,
        "/api/auth/signup",
        &json!({ "email": "ada@example.com", "password": "secret1", "name": "Ada" }),
    )?
    .build()?;
    let response = send(&app, request).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await?;
    assert_eq!(body["success"], json!(false));
    assert!(body.get("detail").is_none());
    Ok(())
}

#[tokio::test]
async fn signup_retry_replays_identical_response() -> Result<()> {
    let app = test_app();
    let first = signup(&app, "ada@example.com", "k-1").await?;
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_bytes(first).await?;

    let second = signup(&app, "ada@example.com", "k-1").await?;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_bytes(second).await?, first);

    // Only the first request produced a verification email.
    assert_eq!(app.outbox.messages().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn verify_then_check_auth_with_cookies() -> Result<()> {
    let app = test_app();
    let jar = registered(&app, "ada@example.com").await?;
    assert!(cookie_value(&jar, "access_token").is_some());
    assert!(cookie_value(&jar, "refresh_token").is_some());

    let request = Request::builder()
        .uri("/api/auth/check-auth")
        .header(header::COOKIE, jar.join("; "))
        .body(Body::empty())?;
    let response = send(&app, request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["user"]["email"], json!("ada@example.com"));
    assert!(body["user"].get("password_hash").is_none());
    Ok(())
}

#[tokio::test]
async fn login_logout_revokes_session() -> Result<()> {
    let app = test_app();
    registered(&app, "ada@example.com").await?;

    let wrong = json_request(
        Method::POST,
        "/api/auth/login",
        &json!({ "email": "ada@example.com", "password": "nope-nope" }),
    )?
    .build()?;
    assert_eq!(send(&app, wrong).await?.status(), StatusCode::UNAUTHORIZED);

    let login = json_request(
        Method::POST,
        "/api/auth/login",
        &json!({ "email": "ada@example.com", "password": "secret1" }),
    )?
    .build()?;
    let response = send(&app, login).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let jar = cookies(&response);
    let session = cookie_value(&jar, "refresh_token")
        .ok_or_else(|| anyhow!("no session cookie"))?
        .to_string();

    let logout = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/logout")
        .header(header::COOKIE, jar.join("; "))
        .body(Body::empty())?;
    let response = send(&app, logout).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(cookies(&response)
        .iter()
        .any(|pair| pair == "refresh_token="));

    // The session is gone, so a refresh cookie alone no longer authenticates.
    let check = Request::builder()
        .uri("/api/auth/check-auth")
        .header(header::COOKIE, format!("refresh_token={session}"))
        .body(Body::empty())?;
    assert_eq!(send(&app, check).await?.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn bearer_only_caller_reaches_protected_routes() -> Result<()> {
    let app = test_app();
    let jar = registered(&app, "ada@example.com").await?;
    let access = cookie_value(&jar, "access_token")
        .ok_or_else(|| anyhow!("no access cookie"))?
        .to_string();
    let session = cookie_value(&jar, "refresh_token")
        .ok_or_else(|| anyhow!("no session cookie"))?
        .to_string();

    // check-auth always needs the live session behind the caller.
    let check = Request::builder()
        .uri("/api/auth/check-auth")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(Body::empty())?;
    assert_eq!(send(&app, check).await?.status(), StatusCode::UNAUTHORIZED);

    let revoke = json_request(
        Method::DELETE,
        "/api/auth/sessions/others",
        &json!({ "password": "secret1" }),
    )?
    .header("authorization", &format!("Bearer {access}"))
    .build()?;
    let response = send(&app, revoke).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["revoked"], json!(1));

    // The cookie session was one of the "other" sessions.
    let check = Request::builder()
        .uri("/api/auth/check-auth")
        .header(header::COOKIE, format!("refresh_token={session}"))
        .body(Body::empty())?;
    assert_eq!(send(&app, check).await?.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn password_reset_flow() -> Result<()> {
    let app = test_app();
    registered(&app, "ada@example.com").await?;

    let forgot = json_request(
        Method::POST,
        "/api/auth/forgot-password",
        &json!({ "email": "ada@example.com" }),
    )?
    .build()?;
    assert_eq!(send(&app, forgot).await?.status(), StatusCode::OK);

    let reset_url = app
        .outbox
        .last_param(EmailTemplate::PasswordReset, "reset_url")
        .await
        .ok_or_else(|| anyhow!("no reset email"))?;
    let token = reset_url
        .rsplit('/')
        .next()
        .ok_or_else(|| anyhow!("malformed reset url"))?;
    let uri = format!("/api/auth/reset-password/{token}");

    let reset = json_request(Method::POST, &uri, &json!({ "password": "another1" }))?
        .header("idempotency-key", "reset-1")
        .build()?;
    assert_eq!(send(&app, reset).await?.status(), StatusCode::OK);

    // Token is single use.
    let again = json_request(Method::POST, &uri, &json!({ "password": "another2" }))?
        .header("idempotency-key", "reset-2")
        .build()?;
    assert_eq!(send(&app, again).await?.status(), StatusCode::BAD_REQUEST);

    let login = json_request(
        Method::POST,
        "/api/auth/login",
        &json!({ "email": "ada@example.com", "password": "another1" }),
    )?
    .build()?;
    assert_eq!(send(&app, login).await?.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn unknown_provider_is_not_found() -> Result<()> {
    let app = test_app();
    for uri in ["/api/auth/github", "/api/auth/local", "/api/auth/google"] {
        let request = Request::builder().uri(uri).body(Body::empty())?;
        let response = send(&app, request).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
    Ok(())
}

fn clears_state_cookie(response: &Response) -> bool {
    cookie_value(&cookies(response), "oauth_state") == Some("")
}

#[tokio::test]
async fn failed_callback_still_clears_state_cookie() -> Result<()> {
    let app = test_app_with(ProviderRegistry::new().with_adapter(Arc::new(StubGoogle)));

    let cases = [
        ("/api/auth/google/callback?code=c&state=forged", StatusCode::BAD_REQUEST),
        (
            "/api/auth/google/callback?error=access_denied&state=s",
            StatusCode::BAD_GATEWAY,
        ),
    ];
    for (uri, status) in cases {
        let request = Request::builder()
            .uri(uri)
            .header(header::COOKIE, "oauth_state=s")
            .body(Body::empty())?;
        let response = send(&app, request).await?;
        assert_eq!(response.status(), status, "{uri}");
        assert!(clears_state_cookie(&response), "{uri}");
    }
    Ok(())
}

#[tokio::test]
async fn successful_callback_logs_in_and_clears_state_cookie() -> Result<()> {
    let app = test_app_with(ProviderRegistry::new().with_adapter(Arc::new(StubGoogle)));

    let request = Request::builder()
        .uri("/api/auth/google")
        .body(Body::empty())?;
    let response = send(&app, request).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let state = cookie_value(&cookies(&response), "oauth_state")
        .ok_or_else(|| anyhow!("no state cookie"))?
        .to_string();

    let request = Request::builder()
        .uri(format!("/api/auth/google/callback?code=abc&state={state}"))
        .header(header::COOKIE, format!("oauth_state={state}"))
        .body(Body::empty())?;
    let response = send(&app, request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(clears_state_cookie(&response));
    let pairs = cookies(&response);
    assert!(cookie_value(&pairs, "access_token").is_some());
    assert!(cookie_value(&pairs, "refresh_token").is_some());
    Ok(())
}

#[tokio::test]
async fn health_reports_stores_and_request_id() -> Result<()> {
    let app = test_app();
    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = send(&app, request).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("x-app"));
    let body = body_json(response).await?;
    assert_eq!(body["name"], json!("authgate"));
    assert_eq!(body["accounts"], json!("ok"));
    Ok(())
}
