use super::{form_body, found_with_flashes, internal_error, render};
use crate::sesame::{
    forms::{FormErrors, LoginForm},
    pages, password,
    session::{Flash, FlashLevel},
    state::AuthState,
    store::UserStore,
};
use axum::{
    body::Bytes,
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

pub const MSG_LOGIN_FAILED: &str = "Login failed. Check your username and/or password.";

#[utoipa::path(
    get,
    path= "/login",
    responses (
        (status = 200, description = "Login form", body = String, content_type = "text/html"),
    ),
    tag= "login"
)]
#[instrument(skip_all)]
pub async fn login_form(headers: HeaderMap, auth: Extension<Arc<AuthState>>) -> Response {
    let jar = auth.pending_flashes(&headers);
    render(&auth, &headers, jar, StatusCode::OK, |csrf_token, flashes| {
        pages::login("", &FormErrors::default(), csrf_token, flashes)
    })
}

#[utoipa::path(
    post,
    path= "/login",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses (
        (status = 302, description = "Login successful, session cookie set, redirect to /index"),
        (status = 200, description = "Form re-rendered with validation errors or a flashed message", body = String, content_type = "text/html"),
        (status = 401, description = "Unknown username or wrong password (strict status mode)", body = String, content_type = "text/html"),
        (status = 422, description = "Invalid input or CSRF token (strict status mode)", body = String, content_type = "text/html"),
        (status = 500, description = "Credential store unavailable"),
    ),
    tag= "login"
)]
#[instrument(skip_all)]
pub async fn login(
    headers: HeaderMap,
    store: Extension<Arc<dyn UserStore>>,
    auth: Extension<Arc<AuthState>>,
    body: Bytes,
) -> Response {
    let form = LoginForm::from_urlencoded(form_body(&headers, &body));
    debug!("Login attempt for {}", form.username);

    let mut jar = auth.pending_flashes(&headers);

    let mut errors = form.validate();
    if let Err(e) = auth.check_csrf(&headers, &form.csrf_token) {
        debug!("CSRF check failed: {e}");
        errors.add("csrf_token", e.to_string());
    }

    if !errors.is_empty() {
        debug!("Login form rejected");
        let status = auth
            .config()
            .rejection_status(StatusCode::UNPROCESSABLE_ENTITY);
        return render(&auth, &headers, jar, status, |csrf_token, flashes| {
            pages::login(&form.username, &errors, csrf_token, flashes)
        });
    }

    let user = match store.find_by_username(&form.username).await {
        Ok(user) => user,
        Err(e) => {
            error!("Error looking up user: {e}");
            return internal_error();
        }
    };

    // unknown user and wrong password are indistinguishable to the client
    let authenticated = match user {
        Some(user) => password::verify_blocking(user.password_hash, form.password.clone()).await,
        None => false,
    };

    if !authenticated {
        debug!("Invalid credentials");
        jar.push(Flash::new(FlashLevel::Danger, MSG_LOGIN_FAILED));
        let status = auth.config().rejection_status(StatusCode::UNAUTHORIZED);
        return render(&auth, &headers, jar, status, |csrf_token, flashes| {
            pages::login(&form.username, &FormErrors::default(), csrf_token, flashes)
        });
    }

    let cookie = match auth.session_cookie(&form.username) {
        Ok(cookie) => cookie,
        Err(e) => {
            error!("Error creating session: {e}");
            return internal_error();
        }
    };

    info!("User logged in");

    let mut response_headers = HeaderMap::new();
    response_headers.append(SET_COOKIE, cookie);
    found_with_flashes(&auth, "/index", jar, response_headers)
}
