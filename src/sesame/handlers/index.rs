use super::{found, render};
use crate::sesame::{pages, state::AuthState};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, instrument};

#[utoipa::path(
    get,
    path= "/index",
    responses (
        (status = 200, description = "Landing page of the logged-in user", body = String, content_type = "text/html"),
        (status = 302, description = "No valid session, redirect to /login"),
    ),
    tag= "sesame"
)]
#[instrument(skip_all)]
pub async fn index(headers: HeaderMap, auth: Extension<Arc<AuthState>>) -> Response {
    let Some(session) = auth.current_session(&headers) else {
        debug!("No valid session");
        return found("/login");
    };

    let jar = auth.pending_flashes(&headers);
    render(&auth, &headers, jar, StatusCode::OK, |_, flashes| {
        pages::index(&session.username, flashes)
    })
}
