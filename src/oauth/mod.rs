//! `OAuth2` provider adapters.
//!
//! Each provider turns an authorization code into a normalized
//! [`ExternalIdentity`]. Every failure (network, non-2xx status, malformed
//! payload, identity verification) surfaces as one [`ProviderError`].

mod facebook;
mod google;
pub mod pkce;
mod x;

pub use facebook::FacebookAdapter;
pub use google::GoogleAdapter;
pub use x::XAdapter;

use crate::accounts::Provider;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tracing::debug;
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Static registration of this service with a provider.
#[derive(Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub callback_url: String,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("callback_url", &self.callback_url)
            .finish_non_exhaustive()
    }
}

/// Identity as reported by a provider, before reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub external_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("{provider} provider error: {reason}")]
pub struct ProviderError {
    pub provider: Provider,
    pub reason: String,
}

impl ProviderError {
    pub fn new(provider: Provider, reason: impl Into<String>) -> Self {
        Self {
            provider,
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether the authorization request carries a PKCE challenge.
    fn uses_pkce(&self) -> bool {
        false
    }

    /// Build the URL the browser is redirected to.
    ///
    /// # Errors
    /// Returns an error if the configured endpoint cannot be parsed.
    fn authorization_url(
        &self,
        state: &str,
        code_challenge: Option<&str>,
    ) -> Result<Url, ProviderError>;

    /// Exchange an authorization code for the caller's identity.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ExternalIdentity, ProviderError>;
}

/// Enabled providers, keyed by tag.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.adapters.keys()).finish()
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the stock adapters for every configured provider.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_configs(configs: &HashMap<Provider, ProviderConfig>) -> anyhow::Result<Self> {
        let client = http_client()?;
        let mut registry = Self::new();
        for (provider, config) in configs {
            let adapter: Arc<dyn ProviderAdapter> = match provider {
                Provider::Google => Arc::new(GoogleAdapter::new(config.clone(), client.clone())),
                Provider::Facebook => {
                    Arc::new(FacebookAdapter::new(config.clone(), client.clone()))
                }
                Provider::X => Arc::new(XAdapter::new(config.clone(), client.clone())),
                Provider::Local => continue,
            };
            registry = registry.with_adapter(adapter);
        }
        Ok(registry)
    }

    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    #[must_use]
    pub fn enabled(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.adapters.keys().copied().collect();
        providers.sort_by_key(|provider| provider.as_str());
        providers
    }
}

fn http_client() -> anyhow::Result<Client> {
    Ok(Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()?)
}

/// Append query parameters to a fixed endpoint.
pub(crate) fn endpoint_with_query(
    provider: Provider,
    endpoint: &str,
    params: &[(&str, &str)],
) -> Result<Url, ProviderError> {
    Url::parse_with_params(endpoint, params)
        .map_err(|err| ProviderError::new(provider, format!("invalid endpoint {endpoint}: {err}")))
}

/// Send a request and decode a JSON body, mapping every failure to `ProviderError`.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    provider: Provider,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|err| ProviderError::new(provider, format!("request failed: {err}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!(%provider, %status, body, "provider returned an error");
        return Err(ProviderError::new(
            provider,
            format!("unexpected status {status}"),
        ));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| ProviderError::new(provider, format!("malformed response: {err}")))
}
