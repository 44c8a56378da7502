use anyhow::{anyhow, Context, Result};
use clap::{builder::BoolishValueParser, Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_SECRET_KEY: &str = "secret-key";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_CSRF_TTL_SECONDS: &str = "csrf-ttl-seconds";
pub const ARG_NO_CSRF: &str = "no-csrf";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_STRICT_STATUS: &str = "strict-status";

/// Shortest accepted signing key, in bytes.
pub const MIN_SECRET_KEY_LEN: usize = 32;

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SECRET_KEY)
                .long(ARG_SECRET_KEY)
                .help("Key used to sign session, flash and CSRF cookies (at least 32 bytes)")
                .env("SESAME_SECRET_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Maximum session age in seconds, 0 keeps sessions until logout")
                .env("SESAME_SESSION_TTL_SECONDS")
                .default_value("0")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CSRF_TTL_SECONDS)
                .long(ARG_CSRF_TTL_SECONDS)
                .help("Maximum age of a form CSRF token in seconds")
                .env("SESAME_CSRF_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_NO_CSRF)
                .long(ARG_NO_CSRF)
                .help("Disable CSRF token checks on form posts")
                .env("SESAME_NO_CSRF")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark cookies Secure (serve over HTTPS)")
                .env("SESAME_COOKIE_SECURE")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_STRICT_STATUS)
                .long(ARG_STRICT_STATUS)
                .help("Answer rejected forms with 401/409/422 instead of 200")
                .env("SESAME_STRICT_STATUS")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
}

#[derive(Debug)]
pub struct Options {
    pub secret_key: SecretString,
    pub session_ttl_seconds: u64,
    pub csrf_ttl_seconds: u64,
    pub csrf_enabled: bool,
    pub cookie_secure: bool,
    pub strict_status: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if the secret key is missing or too short.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret_key = matches
            .get_one::<String>(ARG_SECRET_KEY)
            .context("missing required argument: --secret-key")?;

        if secret_key.len() < MIN_SECRET_KEY_LEN {
            return Err(anyhow!(
                "--{ARG_SECRET_KEY} must be at least {MIN_SECRET_KEY_LEN} bytes long"
            ));
        }

        Ok(Self {
            secret_key: SecretString::from(secret_key.clone()),
            session_ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(0),
            csrf_ttl_seconds: matches
                .get_one::<u64>(ARG_CSRF_TTL_SECONDS)
                .copied()
                .unwrap_or(3600),
            csrf_enabled: !matches.get_flag(ARG_NO_CSRF),
            cookie_secure: matches.get_flag(ARG_COOKIE_SECURE),
            strict_status: matches.get_flag(ARG_STRICT_STATUS),
        })
    }
}
