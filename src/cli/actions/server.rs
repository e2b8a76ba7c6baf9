use crate::{
    accounts::Provider,
    api::{self, ServerConfig},
    auth::AuthConfig,
    notify::EmailWorkerConfig,
    oauth::ProviderConfig,
};
use anyhow::Result;
use secrecy::SecretString;
use std::{collections::HashMap, time::Duration};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub token_secret: SecretString,
    pub public_url: String,
    pub frontend_url: Option<String>,
    pub reset_url_template: Option<String>,
    pub access_token_ttl_seconds: u64,
    pub session_ttl_seconds: u64,
    pub otp_ttl_seconds: u64,
    pub idempotency_ttl_seconds: u64,
    pub reset_token_ttl_seconds: u64,
    pub oauth_state_ttl_seconds: u64,
    pub expose_errors: bool,
    pub providers: HashMap<Provider, ProviderConfig>,
    pub email_poll_seconds: u64,
    pub email_batch_size: usize,
    pub email_max_attempts: u32,
    pub email_backoff_base_seconds: u64,
    pub email_backoff_max_seconds: u64,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        let config = AuthConfig::new(&self.public_url)
            .with_access_token_ttl(Duration::from_secs(self.access_token_ttl_seconds))
            .with_session_ttl(Duration::from_secs(self.session_ttl_seconds))
            .with_otp_ttl(Duration::from_secs(self.otp_ttl_seconds))
            .with_idempotency_ttl(Duration::from_secs(self.idempotency_ttl_seconds))
            .with_reset_token_ttl(Duration::from_secs(self.reset_token_ttl_seconds))
            .with_oauth_state_ttl(Duration::from_secs(self.oauth_state_ttl_seconds));
        match &self.reset_url_template {
            Some(template) => config.with_reset_url_template(template.clone()),
            None => config,
        }
    }

    fn email_config(&self) -> EmailWorkerConfig {
        EmailWorkerConfig::new()
            .with_poll_interval(Duration::from_secs(self.email_poll_seconds))
            .with_batch_size(self.email_batch_size)
            .with_max_attempts(self.email_max_attempts)
            .with_backoff_base(Duration::from_secs(self.email_backoff_base_seconds))
            .with_backoff_max(Duration::from_secs(self.email_backoff_max_seconds))
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let mut providers: Vec<String> = args.providers.keys().map(ToString::to_string).collect();
    providers.sort();
    info!(
        port = args.port,
        public_url = %args.public_url,
        providers = ?providers,
        expose_errors = args.expose_errors,
        "starting authgate"
    );

    let auth = args.auth_config();
    let email = args.email_config();

    api::new(ServerConfig {
        port: args.port,
        dsn: args.dsn,
        token_secret: args.token_secret,
        auth,
        providers: args.providers,
        email,
        frontend_url: args.frontend_url,
        expose_errors: args.expose_errors,
    })
    .await
}
