//! Facebook: authorization code -> access token -> Graph `/me`.

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

const AUTHORIZE_URL: &str = "https://www.facebook.com/v17.0/dialog/oauth";
const TOKEN_URL: &str = "https://graph.facebook.com/v17.0/oauth/access_token";
const PROFILE_URL: &str = "https://graph.facebook.com/v17.0/me";
const SCOPE: &str = "email,public_profile";
const PROFILE_FIELDS: &str = "id,name,email,picture";

#[derive(Debug)]
pub struct FacebookAdapter {
    config: ProviderConfig,
    client: Client,
}

impl FacebookAdapter {
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
struct Profile {
    id: String,
    name: Option<String>,
    email: Option<String>,
    picture: Option<Picture>,
}

#[derive(Debug, Deserialize)]
struct Picture {
    data: Option<PictureData>,
}

#[derive(Debug, Deserialize)]
struct PictureData {
    url: Option<String>,
}

impl From<Profile> for ExternalIdentity {
    fn from(profile: Profile) -> Self {
        Self {
            external_id: profile.id,
            email: profile.email,
            name: profile.name,
            avatar_url: profile
                .picture
                .and_then(|picture| picture.data)
                .and_then(|data| data.url),
        }
    }
}

#[async_trait]
impl ProviderAdapter for FacebookAdapter {
    fn provider(&self) -> Provider {
        Provider::Facebook
    }

    fn authorization_url(
        &self,
        state: &str,
        _code_challenge: Option<&str>,
    ) -> Result<Url, ProviderError> {
        endpoint_with_query(
            Provider::Facebook,
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

    #[instrument(skip_all, fields(provider = "facebook"))]
    async fn exchange_code(
        &self,
        code: &str,
        _code_verifier: Option<&str>,
    ) -> Result<ExternalIdentity, ProviderError> {
        let request = self.client.get(TOKEN_URL).query(&[
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.callback_url.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("code", code),
        ]);
        let token: TokenResponse = fetch_json(Provider::Facebook, request).await?;

        let request = self.client.get(PROFILE_URL).query(&[
            ("fields", PROFILE_FIELDS),
            ("access_token", token.access_token.as_str()),
        ]);
        let profile: Profile = fetch_json(Provider::Facebook, request).await?;
        Ok(profile.into())
    }
}
