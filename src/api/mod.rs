use crate::{
    accounts::{PgAccountStore, Provider},
    api::handlers::{auth::local::IDEMPOTENCY_HEADER, health, root},
    auth::{AuthConfig, AuthDeps, AuthService},
    notify::{spawn_outbox_worker, EmailWorkerConfig, LogEmailSender, PgOutbox},
    oauth::{ProviderConfig, ProviderRegistry},
    secrets::PgSecretStore,
    sessions::{PgSessionStore, TokenCodec},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, options},
    Extension, Router,
};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use handlers::auth::AppState;
pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything the server needs at startup.
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub token_secret: SecretString,
    pub auth: AuthConfig,
    pub providers: HashMap<Provider, ProviderConfig>,
    pub email: EmailWorkerConfig,
    pub frontend_url: Option<String>,
    pub expose_errors: bool,
}

/// Assemble the HTTP application around an [`AppState`].
///
/// CORS is only installed when a frontend origin is given; credentialed
/// requests are allowed from that exact origin.
pub fn app(state: AppState, frontend_origin: Option<HeaderValue>) -> Router {
    // Routes added here (`/` and preflight-only `OPTIONS /health`) stay out of the OpenAPI document.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(Arc::new(state))),
        );

    match frontend_origin {
        Some(origin) => app.layer(
            CorsLayer::new()
                .allow_headers([
                    CONTENT_TYPE,
                    AUTHORIZATION,
                    HeaderName::from_static(IDEMPOTENCY_HEADER),
                ])
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_origin(AllowOrigin::exact(origin))
                .allow_credentials(true),
        ),
        None => app,
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(config: ServerConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&config.dsn)
        .await
        .context("Failed to connect to database")?;

    // Emails are queued in `email_outbox` and delivered off the request path.
    spawn_outbox_worker(pool.clone(), Arc::new(LogEmailSender), config.email);

    let providers = ProviderRegistry::from_configs(&config.providers)
        .context("Failed to configure OAuth providers")?;
    info!(enabled = ?providers.enabled(), "OAuth providers");

    let tokens = TokenCodec::new(&config.token_secret, config.auth.access_token_ttl());
    let deps = AuthDeps {
        accounts: Arc::new(PgAccountStore::new(pool.clone())),
        sessions: Arc::new(PgSessionStore::new(pool.clone(), config.auth.session_ttl())),
        secrets: Arc::new(PgSecretStore::new(pool.clone())),
        notifier: Arc::new(PgOutbox::new(pool)),
        providers,
    };
    let state = AppState::new(AuthService::new(config.auth, tokens, deps))
        .with_expose_errors(config.expose_errors);

    let origin = config
        .frontend_url
        .as_deref()
        .map(frontend_origin)
        .transpose()?;
    let app = app(state, origin);

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Gracefully shutdown"),
                Err(err) => error!("Failed to listen for shutdown signal: {err}"),
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(frontend_url).with_context(|| format!("Invalid frontend URL: {frontend_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend URL must include a valid host: {frontend_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
