use clap::{Arg, Command};

pub const ARG_EMAIL_POLL_SECONDS: &str = "email-poll-seconds";
pub const ARG_EMAIL_BATCH_SIZE: &str = "email-batch-size";
pub const ARG_EMAIL_MAX_ATTEMPTS: &str = "email-max-attempts";
pub const ARG_EMAIL_BACKOFF_BASE: &str = "email-backoff-base-seconds";
pub const ARG_EMAIL_BACKOFF_MAX: &str = "email-backoff-max-seconds";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &clap::ArgMatches) -> Self {
        Self {
            poll_seconds: matches
                .get_one::<u64>(ARG_EMAIL_POLL_SECONDS)
                .copied()
                .unwrap_or(5),
            batch_size: matches
                .get_one::<usize>(ARG_EMAIL_BATCH_SIZE)
                .copied()
                .unwrap_or(10),
            max_attempts: matches
                .get_one::<u32>(ARG_EMAIL_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(5),
            backoff_base_seconds: matches
                .get_one::<u64>(ARG_EMAIL_BACKOFF_BASE)
                .copied()
                .unwrap_or(1),
            backoff_max_seconds: matches
                .get_one::<u64>(ARG_EMAIL_BACKOFF_MAX)
                .copied()
                .unwrap_or(60),
        }
    }
}

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_POLL_SECONDS)
                .long(ARG_EMAIL_POLL_SECONDS)
                .help("Email outbox poll interval in seconds")
                .env("AUTHGATE_EMAIL_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_EMAIL_BATCH_SIZE)
                .long(ARG_EMAIL_BATCH_SIZE)
                .help("Email outbox rows processed per poll")
                .env("AUTHGATE_EMAIL_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_EMAIL_MAX_ATTEMPTS)
                .long(ARG_EMAIL_MAX_ATTEMPTS)
                .help("Max delivery attempts before an email is marked failed")
                .env("AUTHGATE_EMAIL_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_EMAIL_BACKOFF_BASE)
                .long(ARG_EMAIL_BACKOFF_BASE)
                .help("Base delay for email retry backoff")
                .env("AUTHGATE_EMAIL_BACKOFF_BASE_SECONDS")
                .default_value("1")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_EMAIL_BACKOFF_MAX)
                .long(ARG_EMAIL_BACKOFF_MAX)
                .help("Max delay for email retry backoff")
                .env("AUTHGATE_EMAIL_BACKOFF_MAX_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}
