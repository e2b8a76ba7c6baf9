//! Per-provider OAuth client registration arguments.
//!
//! A provider is enabled only when its client id, client secret and callback
//! URL are all present; partial registrations are ignored with a warning.

use clap::{Arg, Command};
use secrecy::SecretString;
use std::collections::HashMap;
use tracing::warn;

use crate::{accounts::Provider, oauth::ProviderConfig};

struct ProviderArgs {
    provider: Provider,
    client_id: (&'static str, &'static str),
    client_secret: (&'static str, &'static str),
    callback_url: (&'static str, &'static str),
}

// (argument id, environment variable)
static PROVIDER_ARGS: [ProviderArgs; 3] = [
    ProviderArgs {
        provider: Provider::Google,
        client_id: ("google-client-id", "AUTHGATE_GOOGLE_CLIENT_ID"),
        client_secret: ("google-client-secret", "AUTHGATE_GOOGLE_CLIENT_SECRET"),
        callback_url: ("google-callback-url", "AUTHGATE_GOOGLE_CALLBACK_URL"),
    },
    ProviderArgs {
        provider: Provider::Facebook,
        client_id: ("facebook-client-id", "AUTHGATE_FACEBOOK_CLIENT_ID"),
        client_secret: ("facebook-client-secret", "AUTHGATE_FACEBOOK_CLIENT_SECRET"),
        callback_url: ("facebook-callback-url", "AUTHGATE_FACEBOOK_CALLBACK_URL"),
    },
    ProviderArgs {
        provider: Provider::X,
        client_id: ("x-client-id", "AUTHGATE_X_CLIENT_ID"),
        client_secret: ("x-client-secret", "AUTHGATE_X_CLIENT_SECRET"),
        callback_url: ("x-callback-url", "AUTHGATE_X_CALLBACK_URL"),
    },
];

#[derive(Debug, Default)]
pub struct Options {
    pub providers: HashMap<Provider, ProviderConfig>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &clap::ArgMatches) -> Self {
        let mut providers = HashMap::new();
        for args in &PROVIDER_ARGS {
            let value = |(id, _): (&str, &str)| matches.get_one::<String>(id).cloned();
            match (
                value(args.client_id),
                value(args.client_secret),
                value(args.callback_url),
            ) {
                (Some(client_id), Some(client_secret), Some(callback_url)) => {
                    providers.insert(
                        args.provider,
                        ProviderConfig {
                            client_id,
                            client_secret: SecretString::from(client_secret),
                            callback_url,
                        },
                    );
                }
                (None, None, None) => {}
                _ => warn!(
                    provider = %args.provider,
                    "incomplete OAuth registration, provider disabled"
                ),
            }
        }
        Self { providers }
    }
}

pub fn with_args(command: Command) -> Command {
    PROVIDER_ARGS.iter().fold(command, |command, args| {
        command
            .arg(
                Arg::new(args.client_id.0)
                    .long(args.client_id.0)
                    .help("OAuth client id")
                    .env(args.client_id.1),
            )
            .arg(
                Arg::new(args.client_secret.0)
                    .long(args.client_secret.0)
                    .help("OAuth client secret")
                    .env(args.client_secret.1)
                    .hide_env_values(true),
            )
            .arg(
                Arg::new(args.callback_url.0)
                    .long(args.callback_url.0)
                    .help("OAuth redirect URI registered with the provider")
                    .env(args.callback_url.1),
            )
    })
}
