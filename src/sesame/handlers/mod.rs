pub mod health;
pub use self::health::health;

pub mod home;
pub use self::home::home;

pub mod register;
pub use self::register::{register, register_form};

pub mod login;
pub use self::login::{login, login_form};

pub mod index;
pub use self::index::index;

pub mod logout;
pub use self::logout::logout;

#[cfg(test)]
mod tests;

// common functions for the handlers
use crate::sesame::{
    session::Flash,
    state::{AuthState, FlashJar},
};
use axum::{
    http::{
        header::{CONTENT_TYPE, LOCATION},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{Html, IntoResponse, Response},
};
use tracing::error;

/// The urlencoded form body, or an empty one for any other content type.
pub(crate) fn form_body<'a>(headers: &HeaderMap, body: &'a [u8]) -> &'a [u8] {
    let urlencoded = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| {
            mime.trim()
                .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        });

    if urlencoded {
        body
    } else {
        &[]
    }
}

/// Plain 302 without touching the flash cookie.
pub(crate) fn found(location: &'static str) -> Response {
    (StatusCode::FOUND, [(LOCATION, HeaderValue::from_static(location))]).into_response()
}

/// 302 carrying the jar's flash messages to the next page.
pub(crate) fn found_with_flashes(
    auth: &AuthState,
    location: &'static str,
    jar: FlashJar,
    mut headers: HeaderMap,
) -> Response {
    if let Err(e) = jar.into_redirect(auth, &mut headers) {
        error!("Failed to store flash messages: {e}");
        return internal_error();
    }
    headers.insert(LOCATION, HeaderValue::from_static(location));
    (StatusCode::FOUND, headers).into_response()
}

/// Render an HTML page, consuming the jar's flash messages and embedding a CSRF token.
pub(crate) fn render<F>(
    auth: &AuthState,
    request_headers: &HeaderMap,
    jar: FlashJar,
    status: StatusCode,
    view: F,
) -> Response
where
    F: FnOnce(&str, &[Flash]) -> String,
{
    let mut headers = HeaderMap::new();
    let csrf_token = match auth.csrf_token(request_headers, &mut headers) {
        Ok(token) => token,
        Err(e) => {
            error!("Failed to issue CSRF token: {e}");
            return internal_error();
        }
    };
    let flashes = jar.into_rendered(auth, &mut headers);

    (status, headers, Html(view(&csrf_token, &flashes))).into_response()
}

pub(crate) fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}
