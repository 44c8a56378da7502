//! Signed client-held state: the login session, flash messages and CSRF tokens.
//!
//! Tokens are `base64url(json).base64url(HMAC-SHA256(key, purpose || 0x00 || json))`.
//! The purpose is part of the MAC input, so a flash cookie can never be replayed as
//! a session cookie (and vice versa). Nothing is stored server side.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use std::time::SystemTime;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE_NAME: &str = "sesame_session";
pub const FLASH_COOKIE_NAME: &str = "sesame_flash";
pub const CSRF_COOKIE_NAME: &str = "sesame_csrf";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("invalid signing key")]
    Key,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose {
    Session,
    Flash,
    Csrf,
}

impl Purpose {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Flash => "flash",
            Self::Csrf => "csrf",
        }
    }
}

/// HMAC-SHA256 signer for everything the server hands to the client.
#[derive(Clone)]
pub struct Signer {
    key: SecretString,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("key", &"***").finish()
    }
}

impl Signer {
    #[must_use]
    pub fn new(key: SecretString) -> Self {
        Self { key }
    }

    fn mac(&self, purpose: Purpose, payload_b64: &str) -> Result<HmacSha256, TokenError> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|_| TokenError::Key)?;
        mac.update(purpose.as_str().as_bytes());
        mac.update(&[0]);
        mac.update(payload_b64.as_bytes());
        Ok(mac)
    }

    /// Serialize and sign `value` for the given purpose.
    ///
    /// # Errors
    /// Returns an error if the value cannot be encoded as JSON.
    pub fn seal<T: Serialize>(&self, purpose: Purpose, value: &T) -> Result<String, TokenError> {
        let payload_b64 = Base64UrlUnpadded::encode_string(&serde_json::to_vec(value)?);
        let signature = self.mac(purpose, &payload_b64)?.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(format!("{payload_b64}.{signature_b64}"))
    }

    /// Verify the signature of `token` and decode its payload.
    ///
    /// # Errors
    /// Returns an error if the token is malformed, signed for another purpose or
    /// with another key, or does not decode into `T`.
    pub fn open<T: DeserializeOwned>(
        &self,
        purpose: Purpose,
        token: &str,
    ) -> Result<T, TokenError> {
        let (payload_b64, signature_b64) = token.split_once('.').ok_or(TokenError::TokenFormat)?;
        if signature_b64.contains('.') {
            return Err(TokenError::TokenFormat);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| TokenError::Base64)?;
        self.mac(purpose, payload_b64)?
            .verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let payload = Base64UrlUnpadded::decode_vec(payload_b64).map_err(|_| TokenError::Base64)?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

/// The authenticated user of a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub issued_at: u64,
}

impl Session {
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            issued_at: now_unix_seconds(),
        }
    }

    /// Open a session token, enforcing `max_age_seconds` unless it is zero.
    ///
    /// # Errors
    /// Returns an error for forged, garbled or expired tokens.
    pub fn open(
        signer: &Signer,
        token: &str,
        max_age_seconds: u64,
        now: u64,
    ) -> Result<Self, TokenError> {
        let session: Self = signer.open(Purpose::Session, token)?;
        if max_age_seconds > 0 && now.saturating_sub(session.issued_at) > max_age_seconds {
            return Err(TokenError::Expired);
        }
        Ok(session)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Danger,
}

impl FlashLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Danger => "danger",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    #[must_use]
    pub fn new(level: FlashLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CsrfError {
    #[error("The CSRF token is missing.")]
    Missing,
    #[error("The CSRF token is invalid.")]
    Invalid,
    #[error("The CSRF token has expired.")]
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct CsrfClaims {
    nonce: String,
    issued_at: u64,
}

/// Fresh random value for the CSRF nonce cookie.
#[must_use]
pub fn generate_csrf_nonce() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Mint the hidden form token bound to `nonce`.
///
/// # Errors
/// Returns an error if the claims cannot be signed.
pub fn issue_csrf_token(signer: &Signer, nonce: &str, now: u64) -> Result<String, TokenError> {
    signer.seal(
        Purpose::Csrf,
        &CsrfClaims {
            nonce: nonce.to_string(),
            issued_at: now,
        },
    )
}

/// Check a submitted form token against the client's nonce cookie.
///
/// # Errors
/// Returns the user-facing reason the token was rejected.
pub fn check_csrf_token(
    signer: &Signer,
    nonce: Option<&str>,
    submitted: &str,
    ttl_seconds: u64,
    now: u64,
) -> Result<(), CsrfError> {
    if submitted.is_empty() {
        return Err(CsrfError::Missing);
    }

    // Without the nonce cookie the token cannot be bound to this client.
    let nonce = nonce.ok_or(CsrfError::Invalid)?;

    let claims: CsrfClaims = signer
        .open(Purpose::Csrf, submitted)
        .map_err(|_| CsrfError::Invalid)?;

    if claims.nonce != nonce {
        return Err(CsrfError::Invalid);
    }

    if now.saturating_sub(claims.issued_at) > ttl_seconds {
        return Err(CsrfError::Expired);
    }

    Ok(())
}

/// Find a cookie by name across all `Cookie` headers of the request.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Build an `HttpOnly` cookie; `max_age_seconds` of `None` makes it a browser-session cookie.
///
/// # Errors
/// Returns an error if the value contains characters not allowed in a header.
pub fn set_cookie(
    name: &str,
    value: &str,
    max_age_seconds: Option<u64>,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax");
    if let Some(max_age) = max_age_seconds {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Build a cookie that makes the client drop `name`.
///
/// # Errors
/// Returns an error if the cookie name is not a valid header value.
pub fn clear_cookie(name: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    set_cookie(name, "", Some(0), secure)
}

#[must_use]
pub fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
