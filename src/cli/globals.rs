use anyhow::{anyhow, Result};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Process-wide configuration resolved once at startup.
#[derive(Clone)]
pub struct GlobalArgs {
    pub dsn: String,
    pub db_username: Option<String>,
    pub db_password: Option<SecretString>,
    pub secret_key: SecretString,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(dsn: String, secret_key: SecretString) -> Self {
        Self {
            dsn,
            db_username: None,
            db_password: None,
            secret_key,
        }
    }

    pub fn set_db_credentials(&mut self, username: Option<String>, password: Option<SecretString>) {
        self.db_username = username;
        self.db_password = password;
    }

    /// Build the connection string, injecting separately supplied credentials.
    ///
    /// # Errors
    /// Returns an error if the DSN is not a valid URL or cannot carry credentials.
    pub fn connection_string(&self) -> Result<String> {
        let mut dsn = Url::parse(&self.dsn)?;

        if let Some(username) = &self.db_username {
            dsn.set_username(username)
                .map_err(|()| anyhow!("Error setting username"))?;
        }

        if let Some(password) = &self.db_password {
            dsn.set_password(Some(password.expose_secret()))
                .map_err(|()| anyhow!("Error setting password"))?;
        }

        Ok(dsn.to_string())
    }
}

impl std::fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dsn = Url::parse(&self.dsn).map_or_else(
            |_| "***".to_string(),
            |mut url| {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            },
        );

        f.debug_struct("GlobalArgs")
            .field("dsn", &dsn)
            .field("db_username", &self.db_username)
            .field("db_password", &self.db_password.as_ref().map(|_| "***"))
            .field("secret_key", &"***")
            .finish()
    }
}
