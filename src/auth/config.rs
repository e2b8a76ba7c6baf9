//! Runtime configuration for the auth flows.

use argon2::Params;
use std::time::Duration;

const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const DEFAULT_OTP_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(2 * 60);
const DEFAULT_RESET_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);
const RESET_TOKEN_PLACEHOLDER: &str = "{token}";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    public_url: String,
    reset_url_template: String,
    access_token_ttl: Duration,
    session_ttl: Duration,
    otp_ttl: Duration,
    idempotency_ttl: Duration,
    reset_token_ttl: Duration,
    oauth_state_ttl: Duration,
    password_params: Params,
}

impl AuthConfig {
    #[must_use]
    pub fn new(public_url: &str) -> Self {
        let public_url = public_url.trim_end_matches('/').to_string();
        let reset_url_template =
            format!("{public_url}/api/auth/reset-password/{RESET_TOKEN_PLACEHOLDER}");
        Self {
            public_url,
            reset_url_template,
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            session_ttl: DEFAULT_SESSION_TTL,
            otp_ttl: DEFAULT_OTP_TTL,
            idempotency_ttl: DEFAULT_IDEMPOTENCY_TTL,
            reset_token_ttl: DEFAULT_RESET_TOKEN_TTL,
            oauth_state_ttl: DEFAULT_OAUTH_STATE_TTL,
            password_params: Params::default(),
        }
    }

    /// Link template for reset emails; `{token}` is replaced with the raw token.
    #[must_use]
    pub fn with_reset_url_template(mut self, template: String) -> Self {
        self.reset_url_template = template;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_otp_ttl(mut self, ttl: Duration) -> Self {
        self.otp_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl(mut self, ttl: Duration) -> Self {
        self.reset_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_oauth_state_ttl(mut self, ttl: Duration) -> Self {
        self.oauth_state_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_password_params(mut self, params: Params) -> Self {
        self.password_params = params;
        self
    }

    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn otp_ttl(&self) -> Duration {
        self.otp_ttl
    }

    #[must_use]
    pub fn idempotency_ttl(&self) -> Duration {
        self.idempotency_ttl
    }

    #[must_use]
    pub fn reset_token_ttl(&self) -> Duration {
        self.reset_token_ttl
    }

    #[must_use]
    pub fn oauth_state_ttl(&self) -> Duration {
        self.oauth_state_ttl
    }

    pub(crate) fn password_params(&self) -> &Params {
        &self.password_params
    }

    /// Cookies carry `Secure` only when the service is reached over https.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.public_url.starts_with("https://")
    }

    pub(crate) fn reset_url(&self, token: &str) -> String {
        self.reset_url_template.replace(RESET_TOKEN_PLACEHOLDER, token)
    }
}
