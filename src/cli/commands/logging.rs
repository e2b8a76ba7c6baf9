//! Logging arguments: how verbose the service is and how events are rendered.

use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

use crate::cli::telemetry::LogFormat;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// `AUTHGATE_LOG_LEVEL` accepts a level name or its verbosity count.
fn verbosity_parser() -> ValueParser {
    ValueParser::from(|raw: &str| -> Result<u8, String> {
        let raw = raw.trim().to_ascii_lowercase();
        if let Some(index) = LEVEL_NAMES.iter().position(|name| *name == raw) {
            return u8::try_from(index).map_err(|err| err.to_string());
        }
        match raw.parse::<u8>() {
            Ok(count) if usize::from(count) < LEVEL_NAMES.len() => Ok(count),
            _ => Err(format!(
                "invalid log level '{raw}', expected one of {} or 0-4",
                LEVEL_NAMES.join(", ")
            )),
        }
    })
}

fn format_parser() -> ValueParser {
    ValueParser::from(|raw: &str| -> Result<LogFormat, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("invalid log format '{other}', expected pretty or json")),
        }
    })
}

/// ERROR is the floor: no `-v` and `error` both leave the default in place.
#[must_use]
pub const fn level_for(verbosity: u8) -> Option<Level> {
    match verbosity {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    pub level: Option<Level>,
    pub format: LogFormat,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            level: level_for(matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0)),
            format: matches
                .get_one::<LogFormat>(ARG_LOG_FORMAT)
                .copied()
                .unwrap_or_default(),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("AUTHGATE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(verbosity_parser()),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long(ARG_LOG_FORMAT)
                .help("Log output format: pretty or json")
                .env("AUTHGATE_LOG_FORMAT")
                .global(true)
                .default_value("pretty")
                .value_parser(format_parser()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        with_args(Command::new("authgate"))
    }

    fn options(args: &[&str]) -> Result<Options, clap::Error> {
        let mut argv = vec!["authgate"];
        argv.extend_from_slice(args);
        Ok(Options::parse(&command().try_get_matches_from(argv)?))
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0), None);
        assert_eq!(level_for(1), Some(Level::WARN));
        assert_eq!(level_for(3), Some(Level::DEBUG));
        assert_eq!(level_for(9), Some(Level::TRACE));
    }

    #[test]
    fn defaults_to_error_and_pretty() -> Result<(), clap::Error> {
        temp_env::with_vars(
            [
                ("AUTHGATE_LOG_LEVEL", None::<&str>),
                ("AUTHGATE_LOG_FORMAT", None),
            ],
            || {
                let parsed = options(&[])?;
                assert_eq!(parsed.level, None);
                assert_eq!(parsed.format, LogFormat::Pretty);

                assert_eq!(options(&["-vvv"])?.level, Some(Level::DEBUG));
                Ok(())
            },
        )
    }

    #[test]
    fn level_env_accepts_names_and_counts() -> Result<(), clap::Error> {
        for (raw, level) in [
            ("INFO", Some(Level::INFO)),
            ("debug", Some(Level::DEBUG)),
            ("1", Some(Level::WARN)),
            ("error", None),
        ] {
            temp_env::with_var("AUTHGATE_LOG_LEVEL", Some(raw), || -> Result<(), clap::Error> {
                assert_eq!(options(&[])?.level, level, "{raw}");
                Ok(())
            })?;
        }
        Ok(())
    }

    #[test]
    fn invalid_level_or_format_is_rejected() {
        temp_env::with_var("AUTHGATE_LOG_LEVEL", Some("loud"), || {
            assert!(options(&[]).is_err());
        });
        temp_env::with_var("AUTHGATE_LOG_LEVEL", Some("7"), || {
            assert!(options(&[]).is_err());
        });
        temp_env::with_var("AUTHGATE_LOG_FORMAT", Some("xml"), || {
            assert!(options(&[]).is_err());
        });
    }

    #[test]
    fn format_from_env_or_flag() -> Result<(), clap::Error> {
        temp_env::with_var("AUTHGATE_LOG_FORMAT", Some("JSON"), || -> Result<(), clap::Error> {
            assert_eq!(options(&[])?.format, LogFormat::Json);
            Ok(())
        })?;
        temp_env::with_var("AUTHGATE_LOG_FORMAT", None::<&str>, || -> Result<(), clap::Error> {
            assert_eq!(options(&["--log-format", "json"])?.format, LogFormat::Json);
            Ok(())
        })
    }
}
