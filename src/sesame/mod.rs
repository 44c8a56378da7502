#![allow(clippy::needless_for_each)]

use crate::{
    cli::globals::GlobalArgs,
    sesame::handlers::{
        health, health::__path_health, home::__path_home, index::__path_index,
        login::__path_login, login::__path_login_form, logout::__path_logout,
        register::__path_register, register::__path_register_form,
    },
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::get,
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa::OpenApi;

pub mod forms;
pub mod handlers;
pub mod pages;
pub mod password;
pub mod session;
pub mod state;
pub mod store;

pub use state::{AuthConfig, AuthState};
use store::{PgUserStore, UserStore};

#[derive(OpenApi)]
#[openapi(
    paths(home, register_form, register, login_form, login, index, logout, health),
    components(schemas(health::Health, forms::RegisterForm, forms::LoginForm)),
    tags(
        (name = "sesame", description = "Username and password authentication")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Build the application router around a credential store.
pub fn router(store: Arc<dyn UserStore>, auth: Arc<AuthState>) -> Router {
    Router::new()
        .route("/", get(handlers::home))
        .route(
            "/register",
            get(handlers::register_form).post(handlers::register),
        )
        .route("/login", get(handlers::login_form).post(handlers::login))
        .route("/index", get(handlers::index))
        .route("/logout", get(handlers::logout))
        .route("/health", get(handlers::health).head(handlers::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(auth))
                .layer(Extension(store)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    max_connections: u32,
    globals: &GlobalArgs,
    config: AuthConfig,
) -> Result<()> {
    let dsn = globals.connection_string()?;

    let store = PgUserStore::connect(&dsn, max_connections)
        .await
        .context("Failed to connect to database")?;

    let auth = AuthState::new(config, globals.secret_key.clone());

    let app = router(Arc::new(store), Arc::new(auth));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
