//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action to run, currently only the HTTP
//! server with its resolved configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{database, session};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    let db_opts = database::Options::parse(matches)?;
    let session_opts = session::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn: db_opts.dsn,
        db_username: db_opts.user,
        db_password: db_opts.password,
        db_max_connections: db_opts.max_connections,
        secret_key: session_opts.secret_key,
        session_ttl_seconds: session_opts.session_ttl_seconds,
        csrf_ttl_seconds: session_opts.csrf_ttl_seconds,
        csrf_enabled: session_opts.csrf_enabled,
        cookie_secure: session_opts.cookie_secure,
        strict_status: session_opts.strict_status,
    }))
}
