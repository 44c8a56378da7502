use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_DSN: &str = "dsn";
pub const ARG_DB_USER: &str = "db-user";
pub const ARG_DB_PASSWORD: &str = "db-password";
pub const ARG_DB_MAX_CONNECTIONS: &str = "db-max-connections";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "Database connection string, example: postgres://host:5432/sesame. Username/password may be given separately with --db-user and --db-password.",
                )
                .env("SESAME_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_DB_USER)
                .long(ARG_DB_USER)
                .help("Database username, overrides the one in the DSN")
                .env("SESAME_DB_USER"),
        )
        .arg(
            Arg::new(ARG_DB_PASSWORD)
                .long(ARG_DB_PASSWORD)
                .help("Database password, overrides the one in the DSN")
                .env("SESAME_DB_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_DB_MAX_CONNECTIONS)
                .long(ARG_DB_MAX_CONNECTIONS)
                .help("Maximum number of pooled database connections")
                .env("SESAME_DB_MAX_CONNECTIONS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub dsn: String,
    pub user: Option<String>,
    pub password: Option<SecretString>,
    pub max_connections: u32,
}

impl Options {
    /// # Errors
    /// Returns an error if the DSN is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            dsn: matches
                .get_one::<String>(ARG_DSN)
                .cloned()
                .context("missing required argument: --dsn")?,
            user: matches.get_one::<String>(ARG_DB_USER).cloned(),
            password: matches
                .get_one::<String>(ARG_DB_PASSWORD)
                .map(|password| SecretString::from(password.clone())),
            max_connections: matches
                .get_one::<u32>(ARG_DB_MAX_CONNECTIONS)
                .copied()
                .unwrap_or(5),
        })
    }
}
