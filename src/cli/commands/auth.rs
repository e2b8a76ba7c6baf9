use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use secrecy::SecretString;

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_PUBLIC_URL: &str = "public-url";
pub const ARG_FRONTEND_URL: &str = "frontend-url";
pub const ARG_RESET_URL_TEMPLATE: &str = "reset-url-template";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl-seconds";
pub const ARG_SESSION_TTL: &str = "session-ttl-seconds";
pub const ARG_OTP_TTL: &str = "otp-ttl-seconds";
pub const ARG_IDEMPOTENCY_TTL: &str = "idempotency-ttl-seconds";
pub const ARG_RESET_TOKEN_TTL: &str = "reset-token-ttl-seconds";
pub const ARG_OAUTH_STATE_TTL: &str = "oauth-state-ttl-seconds";
pub const ARG_EXPOSE_ERRORS: &str = "expose-errors";

#[derive(Debug)]
pub struct Options {
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
}

impl Options {
    /// # Errors
    /// Returns an error if the signing secret is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let seconds = |id: &str| matches.get_one::<u64>(id).copied().unwrap_or_default();
        Ok(Self {
            token_secret: matches
                .get_one::<String>(ARG_TOKEN_SECRET)
                .cloned()
                .map(SecretString::from)
                .context("missing required argument: --token-secret")?,
            public_url: matches
                .get_one::<String>(ARG_PUBLIC_URL)
                .cloned()
                .context("missing required argument: --public-url")?,
            frontend_url: matches.get_one::<String>(ARG_FRONTEND_URL).cloned(),
            reset_url_template: matches.get_one::<String>(ARG_RESET_URL_TEMPLATE).cloned(),
            access_token_ttl_seconds: seconds(ARG_ACCESS_TOKEN_TTL),
            session_ttl_seconds: seconds(ARG_SESSION_TTL),
            otp_ttl_seconds: seconds(ARG_OTP_TTL),
            idempotency_ttl_seconds: seconds(ARG_IDEMPOTENCY_TTL),
            reset_token_ttl_seconds: seconds(ARG_RESET_TOKEN_TTL),
            oauth_state_ttl_seconds: seconds(ARG_OAUTH_STATE_TTL),
            expose_errors: matches.get_flag(ARG_EXPOSE_ERRORS),
        })
    }
}

fn ttl_arg(id: &'static str, env: &'static str, help: &'static str, default: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u64))
}

pub fn with_args(command: Command) -> Command {
    let command = with_url_args(command);
    with_ttl_args(command)
}

fn with_url_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("Secret used to sign access tokens (HS256)")
                .env("AUTHGATE_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_PUBLIC_URL)
                .long(ARG_PUBLIC_URL)
                .help("Public base URL of this service, used for reset links and the cookie Secure flag")
                .env("AUTHGATE_PUBLIC_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_URL)
                .long(ARG_FRONTEND_URL)
                .help("Frontend origin allowed to make credentialed cross-origin requests")
                .env("AUTHGATE_FRONTEND_URL"),
        )
        .arg(
            Arg::new(ARG_RESET_URL_TEMPLATE)
                .long(ARG_RESET_URL_TEMPLATE)
                .help("Password reset link template, `{token}` is replaced with the reset token")
                .env("AUTHGATE_RESET_URL_TEMPLATE"),
        )
        .arg(
            Arg::new(ARG_EXPOSE_ERRORS)
                .long(ARG_EXPOSE_ERRORS)
                .help("Include internal error details in 5xx responses (development only)")
                .env("AUTHGATE_EXPOSE_ERRORS")
                .action(ArgAction::SetTrue),
        )
}

fn with_ttl_args(command: Command) -> Command {
    command
        .arg(ttl_arg(
            ARG_ACCESS_TOKEN_TTL,
            "AUTHGATE_ACCESS_TOKEN_TTL_SECONDS",
            "Access token lifetime in seconds",
            "900",
        ))
        .arg(ttl_arg(
            ARG_SESSION_TTL,
            "AUTHGATE_SESSION_TTL_SECONDS",
            "Session (refresh cookie) lifetime in seconds",
            "2592000",
        ))
        .arg(ttl_arg(
            ARG_OTP_TTL,
            "AUTHGATE_OTP_TTL_SECONDS",
            "Email verification code lifetime in seconds",
            "3600",
        ))
        .arg(ttl_arg(
            ARG_IDEMPOTENCY_TTL,
            "AUTHGATE_IDEMPOTENCY_TTL_SECONDS",
            "How long a completed idempotent response is replayed, in seconds",
            "120",
        ))
        .arg(ttl_arg(
            ARG_RESET_TOKEN_TTL,
            "AUTHGATE_RESET_TOKEN_TTL_SECONDS",
            "Password reset token lifetime in seconds",
            "3600",
        ))
        .arg(ttl_arg(
            ARG_OAUTH_STATE_TTL,
            "AUTHGATE_OAUTH_STATE_TTL_SECONDS",
            "OAuth state (and PKCE verifier) lifetime in seconds",
            "600",
        ))
}
