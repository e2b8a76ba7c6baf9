//! Map validated CLI matches to the action the binary executes.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, email, oauth};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let oauth_opts = oauth::Options::parse(matches);
    let email_opts = email::Options::parse(matches);

    if let Some(template) = &auth_opts.reset_url_template {
        anyhow::ensure!(
            template.contains("{token}"),
            "--reset-url-template must contain a {{token}} placeholder"
        );
    }

    Ok(Action::Server(Args {
        port,
        dsn,
        token_secret: auth_opts.token_secret,
        public_url: auth_opts.public_url,
        frontend_url: auth_opts.frontend_url,
        reset_url_template: auth_opts.reset_url_template,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        otp_ttl_seconds: auth_opts.otp_ttl_seconds,
        idempotency_ttl_seconds: auth_opts.idempotency_ttl_seconds,
        reset_token_ttl_seconds: auth_opts.reset_token_ttl_seconds,
        oauth_state_ttl_seconds: auth_opts.oauth_state_ttl_seconds,
        expose_errors: auth_opts.expose_errors,
        providers: oauth_opts.providers,
        email_poll_seconds: email_opts.poll_seconds,
        email_batch_size: email_opts.batch_size,
        email_max_attempts: email_opts.max_attempts,
        email_backoff_base_seconds: email_opts.backoff_base_seconds,
        email_backoff_max_seconds: email_opts.backoff_max_seconds,
    }))
}
