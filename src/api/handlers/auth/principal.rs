//! Authenticated principal extraction for protected routes.
//!
//! The access token comes from the `Authorization: Bearer` header or the
//! access cookie. When it is missing or expired the service renews it from the
//! session cookie and the new value is sent back as a cookie on the response.

use axum::http::HeaderMap;

use super::{
    cookies::{bearer_token, read_cookie, set_access_cookie, ACCESS_COOKIE, SESSION_COOKIE},
    error::ApiError,
    state::AppState,
};
use crate::accounts::Account;

#[derive(Debug)]
pub struct Principal {
    pub account: Account,
    pub session_token: Option<String>,
    renewed_access_token: Option<String>,
}

impl Principal {
    /// `Set-Cookie` headers the handler must attach to its response.
    pub(crate) fn cookies(&self, state: &AppState) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.renewed_access_token {
            set_access_cookie(&mut headers, state.auth().config(), token);
        }
        headers
    }
}

pub(crate) async fn require_auth(headers: &HeaderMap, state: &AppState) -> Result<Principal, ApiError> {
    let access = bearer_token(headers).or_else(|| read_cookie(headers, ACCESS_COOKIE));
    let session = read_cookie(headers, SESSION_COOKIE);
    let authenticated = state
        .auth()
        .authenticate(access.as_deref(), session.as_deref())
        .await
        .map_err(|err| ApiError::new(err, state))?;
    Ok(Principal {
        account: authenticated.account,
        session_token: session,
        renewed_access_token: authenticated.renewed_access_token,
    })
}
