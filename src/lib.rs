//! # Sesame (username/password authentication)
//!
//! `sesame` is a small server-rendered authentication flow: register, login,
//! a session-gated landing page and logout.
//!
//! ## Credentials
//!
//! Users live in a single `users` table (`username` unique, `password` holding an
//! Argon2id PHC string). The raw password is never persisted. Username uniqueness
//! is enforced by the database; a unique violation is reported to the user the
//! same way as the application-level existence check.
//!
//! ## Sessions
//!
//! There is no server-side session storage. After a successful register or login the
//! client receives an HMAC-SHA256 signed cookie carrying `{username, issued_at}`,
//! verified on every gated request. Flash messages and CSRF tokens use the same
//! signer under distinct purposes, so a token minted for one cookie is never valid
//! for another.
//!
//! ## Failures
//!
//! Bad input and bad credentials re-render the form with inline errors or a flashed
//! banner. Login failures never reveal whether the username exists.

pub mod cli;
pub mod sesame;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
