use crate::{
    cli::globals::GlobalArgs,
    sesame::{self, AuthConfig},
};
use anyhow::Result;
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub db_username: Option<String>,
    pub db_password: Option<SecretString>,
    pub db_max_connections: u32,
    pub secret_key: SecretString,
    pub session_ttl_seconds: u64,
    pub csrf_ttl_seconds: u64,
    pub csrf_enabled: bool,
    pub cookie_secure: bool,
    pub strict_status: bool,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let mut globals = GlobalArgs::new(args.dsn, args.secret_key);

    globals.set_db_credentials(args.db_username, args.db_password);

    debug!("Global args: {:?}", globals);

    let auth_config = AuthConfig::new()
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_csrf_ttl_seconds(args.csrf_ttl_seconds)
        .with_csrf_enabled(args.csrf_enabled)
        .with_cookie_secure(args.cookie_secure)
        .with_strict_status(args.strict_status);

    sesame::new(args.port, args.db_max_connections, &globals, auth_config).await
}
