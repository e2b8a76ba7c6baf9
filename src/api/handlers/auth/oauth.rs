//! OAuth redirect and callback endpoints, one pair per provider.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
};
use std::sync::Arc;

use super::{
    cookies::{clear_cookie, client_meta, login_cookies, read_cookie, set_cookie, SESSION_COOKIE, STATE_COOKIE},
    error::{ApiError, ErrorResponse},
    state::AppState,
    types::{AuthResponse, CallbackQuery},
};
use crate::{
    accounts::Provider,
    auth::{AuthError, Login},
    oauth::ProviderError,
};

fn oauth_provider(name: &str) -> Result<Provider, AuthError> {
    name.parse::<Provider>()
        .ok()
        .filter(|provider| provider.is_oauth())
        .ok_or(AuthError::NotFound("provider"))
}

#[utoipa::path(
    get,
    path = "/api/auth/{provider}",
    params(
        ("provider" = String, Path, description = "google, facebook or x")
    ),
    responses(
        (status = 303, description = "Redirect to the provider's consent page"),
        (status = 404, description = "Unknown or disabled provider", body = ErrorResponse)
    ),
    tag = "oauth"
)]
pub async fn authorize(
    Path(provider): Path<String>,
    state: Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let fail = |err| ApiError::new(err, &state);
    let provider = oauth_provider(&provider).map_err(fail)?;
    let redirect = state.auth().oauth_begin(provider).await.map_err(fail)?;

    let config = state.auth().config();
    let mut cookies = HeaderMap::new();
    set_cookie(
        &mut cookies,
        config,
        STATE_COOKIE,
        &redirect.state,
        config.oauth_state_ttl(),
    );
    Ok((cookies, Redirect::to(redirect.url.as_str())).into_response())
}

#[utoipa::path(
    get,
    path = "/api/auth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "google, facebook or x"),
        CallbackQuery
    ),
    responses(
        (status = 200, description = "Logged in with the external identity", body = AuthResponse),
        (status = 400, description = "State mismatch or missing code", body = ErrorResponse),
        (status = 502, description = "Provider exchange failed", body = ErrorResponse)
    ),
    tag = "oauth"
)]
pub async fn callback(
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Response {
    let config = state.auth().config();
    let outcome = complete_login(&provider, query, &headers, &state).await;
    let mut cookies = match &outcome {
        Ok(login) => login_cookies(config, login),
        Err(_) => HeaderMap::new(),
    };
    // The state is single use: drop the cookie whatever the outcome.
    clear_cookie(&mut cookies, config, STATE_COOKIE);

    match outcome {
        Ok(login) => (
            StatusCode::OK,
            cookies,
            Json(AuthResponse::new(None, login.account)),
        )
            .into_response(),
        Err(err) => (cookies, ApiError::new(err, &state)).into_response(),
    }
}

async fn complete_login(
    provider: &str,
    query: CallbackQuery,
    headers: &HeaderMap,
    state: &AppState,
) -> Result<Login, AuthError> {
    let provider = oauth_provider(provider)?;
    if let Some(denied) = query.error {
        return Err(ProviderError::new(provider, format!("authorization denied: {denied}")).into());
    }

    state
        .auth()
        .oauth_callback(
            provider,
            query.code.as_deref(),
            query.state.as_deref(),
            read_cookie(headers, STATE_COOKIE).as_deref(),
            read_cookie(headers, SESSION_COOKIE).as_deref(),
            &client_meta(headers),
        )
        .await
}
