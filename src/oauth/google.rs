//! Google: authorization code -> ID token -> verified token info.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use super::{
    endpoint_with_query, fetch_json, ExternalIdentity, ProviderAdapter, ProviderConfig,
    ProviderError,
};
use crate::accounts::Provider;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TOKEN_INFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const SCOPE: &str = "openid email profile";
const ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

#[derive(Debug)]
pub struct GoogleAdapter {
    config: ProviderConfig,
    client: Client,
}

impl GoogleAdapter {
    #[must_use]
    pub fn new(config: ProviderConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

/// Subset of the `tokeninfo` response. Google encodes booleans as strings there.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    iss: String,
    sub: String,
    email: Option<String>,
    email_verified: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

fn identity_from_token_info(
    info: TokenInfo,
    client_id: &str,
) -> Result<ExternalIdentity, ProviderError> {
    if info.aud != client_id {
        return Err(ProviderError::new(
            Provider::Google,
            "id token audience mismatch",
        ));
    }
    if !ISSUERS.contains(&info.iss.as_str()) {
        return Err(ProviderError::new(Provider::Google, "id token issuer mismatch"));
    }
    if info.sub.is_empty() {
        return Err(ProviderError::new(Provider::Google, "id token without subject"));
    }
    let verified = info.email_verified.as_deref() == Some("true");
    Ok(ExternalIdentity {
        external_id: info.sub,
        email: info.email.filter(|_| verified),
        name: info.name,
        avatar_url: info.picture,
    })
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorization_url(
        &self,
        state: &str,
        _code_challenge: Option<&str>,
    ) -> Result<Url, ProviderError> {
        endpoint_with_query(
            Provider::Google,
            AUTHORIZE_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("response_type", "code"),
                ("scope", SCOPE),
                ("state", state),
            ],
        )
    }

    #[instrument(skip_all, fields(provider = "google"))]
    async fn exchange_code(
        &self,
        code: &str,
        _code_verifier: Option<&str>,
    ) -> Result<ExternalIdentity, ProviderError> {
        let request = self.client.post(TOKEN_URL).form(&[
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("redirect_uri", self.config.callback_url.as_str()),
            ("grant_type", "authorization_code"),
        ]);
        let tokens: TokenResponse = fetch_json(Provider::Google, request).await?;
        let id_token = tokens
            .id_token
            .ok_or_else(|| ProviderError::new(Provider::Google, "token response without id_token"))?;

        let request = self
            .client
            .get(TOKEN_INFO_URL)
            .query(&[("id_token", id_token.as_str())]);
        let info: TokenInfo = fetch_json(Provider::Google, request).await?;
        identity_from_token_info(info, &self.config.client_id)
    }
}
