//! X (Twitter) `OAuth2` with PKCE and HTTP basic client authentication.

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

const AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";
const TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
const PROFILE_URL: &str = "https://api.twitter.com/2/users/me";
const SCOPE: &str = "tweet.read users.read users.email";
const USER_FIELDS: &str = "profile_image_url,confirmed_email";

#[derive(Debug)]
pub struct XAdapter {
    config: ProviderConfig,
    client: Client,
}

impl XAdapter {
    #[must_use]
    pub fn new(config: ProviderConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    data: User,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    name: Option<String>,
    confirmed_email: Option<String>,
    profile_image_url: Option<String>,
}

impl From<UserEnvelope> for ExternalIdentity {
    fn from(envelope: UserEnvelope) -> Self {
        let user = envelope.data;
        Self {
            external_id: user.id,
            email: user.confirmed_email,
            name: user.name,
            avatar_url: user.profile_image_url,
        }
    }
}

#[async_trait]
impl ProviderAdapter for XAdapter {
    fn provider(&self) -> Provider {
        Provider::X
    }

    fn uses_pkce(&self) -> bool {
        true
    }

    fn authorization_url(
        &self,
        state: &str,
        code_challenge: Option<&str>,
    ) -> Result<Url, ProviderError> {
        let challenge = code_challenge
            .ok_or_else(|| ProviderError::new(Provider::X, "missing PKCE code challenge"))?;
        endpoint_with_query(
            Provider::X,
            AUTHORIZE_URL,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("scope", SCOPE),
                ("state", state),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
            ],
        )
    }

    #[instrument(skip_all, fields(provider = "x"))]
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ExternalIdentity, ProviderError> {
        let verifier = code_verifier
            .ok_or_else(|| ProviderError::new(Provider::X, "missing PKCE code verifier"))?;
        let request = self
            .client
            .post(TOKEN_URL)
            .basic_auth(
                &self.config.client_id,
                Some(self.config.client_secret.expose_secret()),
            )
            .form(&[
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("code_verifier", verifier),
            ]);
        let token: TokenResponse = fetch_json(Provider::X, request).await?;

        let request = self
            .client
            .get(PROFILE_URL)
            .query(&[("user.fields", USER_FIELDS)])
            .bearer_auth(&token.access_token);
        let envelope: UserEnvelope = fetch_json(Provider::X, request).await?;
        Ok(envelope.into())
    }
}
