//! Auth configuration and the shared, read-only state handed to handlers.

use axum::http::{
    header::{InvalidHeaderValue, SET_COOKIE},
    HeaderMap, HeaderValue, StatusCode,
};
use secrecy::SecretString;
use tracing::error;

use super::{
    password::PasswordScheme,
    session::{
        self, check_csrf_token, clear_cookie, cookie_value, generate_csrf_nonce, issue_csrf_token,
        set_cookie, CsrfError, Flash, Purpose, Session, Signer, TokenError, CSRF_COOKIE_NAME,
        FLASH_COOKIE_NAME, SESSION_COOKIE_NAME,
    },
};

const DEFAULT_CSRF_TTL_SECONDS: u64 = 60 * 60;

/// Flash messages kept across redirects; the oldest are dropped first.
pub const MAX_FLASHES: usize = 8;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    session_ttl_seconds: u64,
    csrf_ttl_seconds: u64,
    csrf_enabled: bool,
    cookie_secure: bool,
    strict_status: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    /// Defaults: sessions last until logout, CSRF tokens for an hour, 200 on rejected forms.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_ttl_seconds: 0,
            csrf_ttl_seconds: DEFAULT_CSRF_TTL_SECONDS,
            csrf_enabled: true,
            cookie_secure: false,
            strict_status: false,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_csrf_ttl_seconds(mut self, seconds: u64) -> Self {
        self.csrf_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_csrf_enabled(mut self, enabled: bool) -> Self {
        self.csrf_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_strict_status(mut self, strict: bool) -> Self {
        self.strict_status = strict;
        self
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn csrf_ttl_seconds(&self) -> u64 {
        self.csrf_ttl_seconds
    }

    #[must_use]
    pub fn csrf_enabled(&self) -> bool {
        self.csrf_enabled
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn strict_status(&self) -> bool {
        self.strict_status
    }

    /// Status for a re-rendered form: 200 unless strict statuses are enabled.
    #[must_use]
    pub fn rejection_status(&self, strict: StatusCode) -> StatusCode {
        if self.strict_status {
            strict
        } else {
            StatusCode::OK
        }
    }
}

#[derive(Debug)]
pub struct AuthState {
    config: AuthConfig,
    signer: Signer,
    passwords: PasswordScheme,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, secret_key: SecretString) -> Self {
        Self {
            config,
            signer: Signer::new(secret_key),
            passwords: PasswordScheme::default(),
        }
    }

    #[must_use]
    pub fn with_password_scheme(mut self, passwords: PasswordScheme) -> Self {
        self.passwords = passwords;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    #[must_use]
    pub fn passwords(&self) -> &PasswordScheme {
        &self.passwords
    }

    /// The verified session of the request, if any. Forged or expired cookies count as absent.
    #[must_use]
    pub fn current_session(&self, headers: &HeaderMap) -> Option<Session> {
        let token = cookie_value(headers, SESSION_COOKIE_NAME)?;
        Session::open(
            &self.signer,
            &token,
            self.config.session_ttl_seconds,
            session::now_unix_seconds(),
        )
        .ok()
    }

    /// `Set-Cookie` value that logs `username` in.
    ///
    /// # Errors
    /// Returns an error if the session cannot be signed or encoded as a header.
    pub fn session_cookie(&self, username: &str) -> Result<HeaderValue, CookieError> {
        let token = self.signer.seal(Purpose::Session, &Session::new(username))?;
        let max_age = Some(self.config.session_ttl_seconds).filter(|ttl| *ttl > 0);
        Ok(set_cookie(
            SESSION_COOKIE_NAME,
            &token,
            max_age,
            self.config.cookie_secure,
        )?)
    }

    /// `Set-Cookie` value that logs the client out.
    ///
    /// # Errors
    /// Returns an error if the header cannot be built.
    pub fn clear_session_cookie(&self) -> Result<HeaderValue, CookieError> {
        Ok(clear_cookie(SESSION_COOKIE_NAME, self.config.cookie_secure)?)
    }

    /// Flash messages waiting in the request's flash cookie.
    #[must_use]
    pub fn pending_flashes(&self, headers: &HeaderMap) -> FlashJar {
        let Some(token) = cookie_value(headers, FLASH_COOKIE_NAME) else {
            return FlashJar::default();
        };

        let messages = self
            .signer
            .open::<Vec<Flash>>(Purpose::Flash, &token)
            .map_err(|e| error!("Discarding unreadable flash cookie: {e}"))
            .unwrap_or_default();

        FlashJar {
            messages,
            had_cookie: true,
        }
    }

    /// Hidden form token for this client, setting the nonce cookie when missing.
    ///
    /// # Errors
    /// Returns an error if the token cannot be signed or the cookie built.
    pub fn csrf_token(
        &self,
        headers: &HeaderMap,
        response_headers: &mut HeaderMap,
    ) -> Result<String, CookieError> {
        if !self.config.csrf_enabled {
            return Ok(String::new());
        }

        let nonce = if let Some(nonce) = cookie_value(headers, CSRF_COOKIE_NAME) {
            nonce
        } else {
            let nonce = generate_csrf_nonce();
            response_headers.append(
                SET_COOKIE,
                set_cookie(CSRF_COOKIE_NAME, &nonce, None, self.config.cookie_secure)?,
            );
            nonce
        };

        Ok(issue_csrf_token(
            &self.signer,
            &nonce,
            session::now_unix_seconds(),
        )?)
    }

    /// Validate the submitted form token; always passes when CSRF is disabled.
    ///
    /// # Errors
    /// Returns the reason the token was rejected.
    pub fn check_csrf(&self, headers: &HeaderMap, submitted: &str) -> Result<(), CsrfError> {
        if !self.config.csrf_enabled {
            return Ok(());
        }

        let nonce = cookie_value(headers, CSRF_COOKIE_NAME);
        check_csrf_token(
            &self.signer,
            nonce.as_deref(),
            submitted,
            self.config.csrf_ttl_seconds,
            session::now_unix_seconds(),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Header(#[from] InvalidHeaderValue),
}

/// Flash messages of one request: those carried in by the cookie plus new ones.
#[derive(Debug, Default)]
pub struct FlashJar {
    messages: Vec<Flash>,
    had_cookie: bool,
}

impl FlashJar {
    /// Queue a message. Repeats of a queued message are ignored.
    pub fn push(&mut self, flash: Flash) {
        if self.messages.contains(&flash) {
            return;
        }
        if self.messages.len() >= MAX_FLASHES {
            self.messages.remove(0);
        }
        self.messages.push(flash);
    }

    /// Consume the messages for display in the page being rendered.
    pub fn into_rendered(self, state: &AuthState, response_headers: &mut HeaderMap) -> Vec<Flash> {
        if self.had_cookie {
            match clear_cookie(FLASH_COOKIE_NAME, state.config.cookie_secure) {
                Ok(cookie) => {
                    response_headers.append(SET_COOKIE, cookie);
                }
                Err(e) => error!("Failed to clear flash cookie: {e}"),
            }
        }
        self.messages
    }

    /// Carry the messages over a redirect.
    ///
    /// # Errors
    /// Returns an error if the flash cookie cannot be signed or built.
    pub fn into_redirect(
        self,
        state: &AuthState,
        response_headers: &mut HeaderMap,
    ) -> Result<(), CookieError> {
        if self.messages.is_empty() {
            if self.had_cookie {
                response_headers.append(
                    SET_COOKIE,
                    clear_cookie(FLASH_COOKIE_NAME, state.config.cookie_secure)?,
                );
            }
            return Ok(());
        }

        let token = state.signer.seal(Purpose::Flash, &self.messages)?;
        response_headers.append(
            SET_COOKIE,
            set_cookie(FLASH_COOKIE_NAME, &token, None, state.config.cookie_secure)?,
        );
        Ok(())
    }
}
