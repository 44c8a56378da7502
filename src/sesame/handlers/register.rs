use super::{form_body, found_with_flashes, internal_error, render};
use crate::sesame::{
    forms::{FormErrors, RegisterForm},
    pages,
    session::{Flash, FlashLevel},
    state::{AuthState, FlashJar},
    store::{InsertOutcome, UserStore},
};
use axum::{
    body::Bytes,
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

pub const MSG_USERNAME_TAKEN: &str = "Username already exists. Please choose a different one.";
pub const MSG_REGISTERED: &str = "Registration successful. You are now logged in.";

#[utoipa::path(
    get,
    path= "/register",
    responses (
        (status = 200, description = "Registration form", body = String, content_type = "text/html"),
    ),
    tag= "register"
)]
#[instrument(skip_all)]
pub async fn register_form(headers: HeaderMap, auth: Extension<Arc<AuthState>>) -> Response {
    let jar = auth.pending_flashes(&headers);
    render(&auth, &headers, jar, StatusCode::OK, |csrf_token, flashes| {
        pages::register("", &FormErrors::default(), csrf_token, flashes)
    })
}

#[utoipa::path(
    post,
    path= "/register",
    request_body(content = RegisterForm, content_type = "application/x-www-form-urlencoded"),
    responses (
        (status = 302, description = "Registration successful, session cookie set, redirect to /index"),
        (status = 200, description = "Form re-rendered with validation errors or a flashed message", body = String, content_type = "text/html"),
        (status = 409, description = "Username already exists (strict status mode)", body = String, content_type = "text/html"),
        (status = 422, description = "Invalid input or CSRF token (strict status mode)", body = String, content_type = "text/html"),
        (status = 500, description = "Credential store unavailable"),
    ),
    tag= "register"
)]
#[instrument(skip_all)]
pub async fn register(
    headers: HeaderMap,
    store: Extension<Arc<dyn UserStore>>,
    auth: Extension<Arc<AuthState>>,
    body: Bytes,
) -> Response {
    let form = RegisterForm::from_urlencoded(form_body(&headers, &body));
    debug!("Registration attempt for {}", form.username);

    let mut jar = auth.pending_flashes(&headers);

    let mut errors = form.validate();
    if let Err(e) = auth.check_csrf(&headers, &form.csrf_token) {
        debug!("CSRF check failed: {e}");
        errors.add("csrf_token", e.to_string());
    }

    if !errors.is_empty() {
        debug!("Registration form rejected");
        let status = auth
            .config()
            .rejection_status(StatusCode::UNPROCESSABLE_ENTITY);
        return render(&auth, &headers, jar, status, |csrf_token, flashes| {
            pages::register(&form.username, &errors, csrf_token, flashes)
        });
    }

    match store.find_by_username(&form.username).await {
        Ok(Some(_)) => return username_taken(&auth, &headers, jar, &form),
        Ok(None) => (),
        Err(e) => {
            error!("Error checking if user exists: {e}");
            return internal_error();
        }
    }

    let digest = match auth.passwords().hash_blocking(form.password.clone()).await {
        Ok(digest) => digest,
        Err(e) => {
            error!("Error hashing password: {e:#}");
            return internal_error();
        }
    };

    match store.insert(&form.username, &digest).await {
        Ok(InsertOutcome::Inserted) => (),
        // lost a race against a concurrent registration
        Ok(InsertOutcome::AlreadyExists) => return username_taken(&auth, &headers, jar, &form),
        Err(e) => {
            error!("Error inserting user: {e}");
            return internal_error();
        }
    }

    let cookie = match auth.session_cookie(&form.username) {
        Ok(cookie) => cookie,
        Err(e) => {
            error!("Error creating session: {e}");
            return internal_error();
        }
    };

    info!("User registered");

    jar.push(Flash::new(FlashLevel::Success, MSG_REGISTERED));
    let mut response_headers = HeaderMap::new();
    response_headers.append(SET_COOKIE, cookie);
    found_with_flashes(&auth, "/index", jar, response_headers)
}

fn username_taken(
    auth: &AuthState,
    headers: &HeaderMap,
    mut jar: FlashJar,
    form: &RegisterForm,
) -> Response {
    debug!("Username already exists");
    jar.push(Flash::new(FlashLevel::Danger, MSG_USERNAME_TAKEN));
    let status = auth.config().rejection_status(StatusCode::CONFLICT);
    render(auth, headers, jar, status, |csrf_token, flashes| {
        pages::register(&form.username, &FormErrors::default(), csrf_token, flashes)
    })
}
