use super::{found_with_flashes, internal_error};
use crate::sesame::{
    session::{Flash, FlashLevel},
    state::AuthState,
};
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap},
    response::Response,
};
use std::sync::Arc;
use tracing::{error, instrument};

pub const MSG_LOGGED_OUT: &str = "You have been logged out.";

#[utoipa::path(
    get,
    path= "/logout",
    responses (
        (status = 302, description = "Session cleared, redirect to /login"),
    ),
    tag= "sesame"
)]
#[instrument(skip_all)]
pub async fn logout(headers: HeaderMap, auth: Extension<Arc<AuthState>>) -> Response {
    let mut response_headers = HeaderMap::new();
    match auth.clear_session_cookie() {
        Ok(cookie) => {
            response_headers.append(SET_COOKIE, cookie);
        }
        Err(e) => {
            error!("Error clearing session: {e}");
            return internal_error();
        }
    }

    let mut jar = auth.pending_flashes(&headers);
    jar.push(Flash::new(FlashLevel::Info, MSG_LOGGED_OUT));
    found_with_flashes(&auth, "/login", jar, response_headers)
}
