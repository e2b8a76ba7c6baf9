//! Credential cookies and request metadata helpers.
//!
//! Cookies are always `HttpOnly; SameSite=Lax` and only marked `Secure` when the
//! public URL is served over HTTPS.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE, USER_AGENT},
    HeaderMap, HeaderValue,
};
use std::time::Duration;
use tracing::error;

use crate::{
    auth::{AuthConfig, Login},
    sessions::ClientMeta,
};

pub(crate) const ACCESS_COOKIE: &str = "access_token";
pub(crate) const SESSION_COOKIE: &str = "refresh_token";
pub(crate) const STATE_COOKIE: &str = "oauth_state";

fn build_cookie(
    name: &str,
    value: &str,
    max_age: Duration,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = max_age.as_secs();
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Append a `Set-Cookie` header, logging (not failing) on an unencodable value.
pub(crate) fn set_cookie(
    headers: &mut HeaderMap,
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age: Duration,
) {
    match build_cookie(name, value, max_age, config.cookie_secure()) {
        Ok(cookie) => {
            headers.append(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build {name} cookie: {err}"),
    }
}

pub(crate) fn clear_cookie(headers: &mut HeaderMap, config: &AuthConfig, name: &str) {
    set_cookie(headers, config, name, "", Duration::ZERO);
}

pub(crate) fn set_access_cookie(headers: &mut HeaderMap, config: &AuthConfig, token: &str) {
    set_cookie(headers, config, ACCESS_COOKIE, token, config.access_token_ttl());
}

/// Cookies for a successful login: always the access token, the session
/// cookie only when a new session was created.
pub(crate) fn login_cookies(config: &AuthConfig, login: &Login) -> HeaderMap {
    let mut headers = HeaderMap::new();
    set_access_cookie(&mut headers, config, &login.access_token);
    if let Some(session) = &login.session_token {
        set_cookie(
            &mut headers,
            config,
            SESSION_COOKIE,
            session,
            config.session_ttl(),
        );
    }
    headers
}

pub(crate) fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Client IP from common proxy headers plus the user agent.
pub(crate) fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    let ip = header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| header("x-real-ip"))
        .map(str::to_string);
    ClientMeta {
        user_agent: header(USER_AGENT.as_str()).map(str::to_string),
        ip,
    }
}
