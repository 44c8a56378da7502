use super::{
    login::MSG_LOGIN_FAILED,
    logout::MSG_LOGGED_OUT,
    register::{MSG_REGISTERED, MSG_USERNAME_TAKEN},
};
use crate::sesame::{
    password::PasswordScheme,
    router,
    session::{CsrfError, FLASH_COOKIE_NAME, SESSION_COOKIE_NAME},
    state::{AuthConfig, AuthState},
    store::{InsertOutcome, StoreError, StoreFuture, User, UserStore},
};
use anyhow::{anyhow, Result};
use argon2::Params;
use base64ct::{Base64UrlUnpadded, Encoding};
use axum::{
    body::Body,
    http::{
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        Request, StatusCode,
    },
    response::Response,
    Router,
};
use secrecy::SecretString;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};
use tower::ServiceExt;

const SECRET_KEY: &str = "0123456789abcdef0123456789abcdef";

#[derive(Default)]
struct MemoryStore {
    users: Mutex<Vec<User>>,
    unavailable: bool,
    // lookups miss, as if another request inserted concurrently
    stale_reads: bool,
}

impl MemoryStore {
    fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    fn stale() -> Self {
        Self {
            stale_reads: true,
            ..Self::default()
        }
    }

    fn users(&self) -> Vec<User> {
        self.users.lock().map(|users| users.clone()).unwrap_or_default()
    }
}

impl UserStore for MemoryStore {
    fn find_by_username<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<User>> {
        Box::pin(async move {
            if self.unavailable {
                return Err(StoreError::Unavailable);
            }
            if self.stale_reads {
                return Ok(None);
            }
            let users = self.users.lock().map_err(|_| StoreError::Unavailable)?;
            Ok(users.iter().find(|user| user.username == username).cloned())
        })
    }

    fn insert<'a>(
        &'a self,
        username: &'a str,
        password_hash: &'a str,
    ) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move {
            if self.unavailable {
                return Err(StoreError::Unavailable);
            }
            let mut users = self.users.lock().map_err(|_| StoreError::Unavailable)?;
            if users.iter().any(|user| user.username == username) {
                return Ok(InsertOutcome::AlreadyExists);
            }
            users.push(User {
                username: username.to_string(),
                password_hash: password_hash.to_string(),
            });
            Ok(InsertOutcome::Inserted)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if self.unavailable {
                Err(StoreError::Unavailable)
            } else {
                Ok(())
            }
        })
    }
}

fn auth_state(config: AuthConfig) -> Result<Arc<AuthState>> {
    let params = Params::new(8, 1, 1, None).map_err(|e| anyhow!("{e}"))?;
    Ok(Arc::new(
        AuthState::new(config, SecretString::from(SECRET_KEY.to_string()))
            .with_password_scheme(PasswordScheme::with_params(params)),
    ))
}

fn app(store: Arc<MemoryStore>, config: AuthConfig) -> Result<Router> {
    Ok(router(store, auth_state(config)?))
}

struct Page {
    status: StatusCode,
    location: Option<String>,
    set_cookies: Vec<String>,
    body: String,
}

/// Minimal browser: keeps cookies and the last CSRF token it was served.
#[derive(Default)]
struct Client {
    cookies: BTreeMap<String, String>,
    csrf_token: Option<String>,
}

impl Client {
    async fn get(&mut self, app: &Router, path: &str) -> Result<Page> {
        let request = self.request("GET", path).body(Body::empty())?;
        self.send(app, request).await
    }

    /// POST the fields plus the CSRF token from the last rendered form.
    async fn post(&mut self, app: &Router, path: &str, fields: &[(&str, &str)]) -> Result<Page> {
        let mut fields = fields.to_vec();
        let token = self.csrf_token.clone().unwrap_or_default();
        fields.push(("csrf_token", token.as_str()));
        self.post_raw(app, path, &fields).await
    }

    async fn post_raw(
        &mut self,
        app: &Router,
        path: &str,
        fields: &[(&str, &str)],
    ) -> Result<Page> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let request = self
            .request("POST", path)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))?;
        self.send(app, request).await
    }

    fn request(&self, method: &str, path: &str) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(path);
        if self.cookies.is_empty() {
            return builder;
        }
        let cookie = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        builder.header(COOKIE, cookie)
    }

    async fn send(&mut self, app: &Router, request: Request<Body>) -> Result<Page> {
        let response: Response = app.clone().oneshot(request).await?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .map(|value| value.to_str().map(str::to_string))
            .transpose()?;
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|value| value.to_str().map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;

        for cookie in &set_cookies {
            let pair = cookie.split(';').next().unwrap_or_default();
            let (name, value) = pair.split_once('=').ok_or_else(|| anyhow!("bad cookie"))?;
            if value.is_empty() || cookie.contains("Max-Age=0") {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_string(), value.to_string());
            }
        }

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body = String::from_utf8(bytes.to_vec())?;

        if let Some(token) = hidden_csrf_token(&body) {
            self.csrf_token = Some(token);
        }

        Ok(Page {
            status,
            location,
            set_cookies,
            body,
        })
    }

    fn has_session(&self) -> bool {
        self.cookies.contains_key(SESSION_COOKIE_NAME)
    }
}

fn hidden_csrf_token(body: &str) -> Option<String> {
    let marker = r#"name="csrf_token" value=""#;
    let start = body.find(marker)? + marker.len();
    let end = body[start..].find('"')?;
    Some(body[start..start + end].to_string())
}

async fn register(
    client: &mut Client,
    app: &Router,
    username: &str,
    password: &str,
) -> Result<Page> {
    client.get(app, "/register").await?;
    client
        .post(
            app,
            "/register",
            &[
                ("username", username),
                ("password", password),
                ("confirm_password", password),
            ],
        )
        .await
}

async fn login(
    client: &mut Client,
    app: &Router,
    username: &str,
    password: &str,
) -> Result<Page> {
    client.get(app, "/login").await?;
    client
        .post(app, "/login", &[("username", username), ("password", password)])
        .await
}

#[tokio::test]
async fn home_redirects_to_login() -> Result<()> {
    let app = app(Arc::new(MemoryStore::default()), AuthConfig::new())?;
    let page = Client::default().get(&app, "/").await?;
    assert_eq!(page.status, StatusCode::FOUND);
    assert_eq!(page.location.as_deref(), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn end_to_end_scenario() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let app = app(store.clone(), AuthConfig::new())?;

    // register alice
    let mut alice = Client::default();
    let page = register(&mut alice, &app, "alice", "secret1").await?;
    assert_eq!(page.status, StatusCode::FOUND);
    assert_eq!(page.location.as_deref(), Some("/index"));
    assert!(alice.has_session());

    let page = alice.get(&app, "/index").await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("Welcome, alice!"));
    assert!(page.body.contains(MSG_REGISTERED));

    // flash is shown once
    let page = alice.get(&app, "/index").await?;
    assert!(!page.body.contains(MSG_REGISTERED));

    // alice registers again while logged in; her session is left alone
    let session = alice.cookies.get(SESSION_COOKIE_NAME).cloned();
    let page = register(&mut alice, &app, "alice", "secret2").await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains(MSG_USERNAME_TAKEN));
    assert!(!page
        .set_cookies
        .iter()
        .any(|cookie| cookie.starts_with(&format!("{SESSION_COOKIE_NAME}="))));
    assert_eq!(alice.cookies.get(SESSION_COOKIE_NAME).cloned(), session);
    assert_eq!(store.users().len(), 1);

    // register alice again from a fresh client
    let mut other = Client::default();
    let page = register(&mut other, &app, "alice", "secret1").await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains(MSG_USERNAME_TAKEN));
    assert!(page.body.contains(r#"value="alice""#));
    assert!(!other.has_session());
    assert_eq!(store.users().len(), 1);

    // wrong password
    let page = login(&mut other, &app, "alice", "wrongpass").await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains(MSG_LOGIN_FAILED));
    assert!(!other.has_session());

    // right password
    let page = login(&mut other, &app, "alice", "secret1").await?;
    assert_eq!(page.status, StatusCode::FOUND);
    assert_eq!(page.location.as_deref(), Some("/index"));
    assert!(other.has_session());

    let page = other.get(&app, "/index").await?;
    assert!(page.body.contains("Welcome, alice!"));

    Ok(())
}

#[tokio::test]
async fn stored_password_is_hashed() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let app = app(store.clone(), AuthConfig::new())?;

    register(&mut Client::default(), &app, "alice", "secret1").await?;

    let users = store.users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].username, "alice");
    assert_ne!(users[0].password_hash, "secret1");
    assert!(users[0].password_hash.starts_with("$argon2id$"));
    Ok(())
}

#[tokio::test]
async fn unknown_user_and_wrong_password_look_the_same() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let app = app(store, AuthConfig::new())?;
    register(&mut Client::default(), &app, "alice", "secret1").await?;

    let wrong_password = login(&mut Client::default(), &app, "alice", "wrongpass").await?;
    let unknown_user = login(&mut Client::default(), &app, "mallory", "wrongpass").await?;

    assert_eq!(wrong_password.status, unknown_user.status);
    assert!(wrong_password.body.contains(MSG_LOGIN_FAILED));
    assert!(unknown_user.body.contains(MSG_LOGIN_FAILED));
    Ok(())
}

#[tokio::test]
async fn logout_ends_the_session() -> Result<()> {
    let app = app(Arc::new(MemoryStore::default()), AuthConfig::new())?;
    let mut client = Client::default();
    register(&mut client, &app, "alice", "secret1").await?;
    assert!(client.has_session());

    let page = client.get(&app, "/logout").await?;
    assert_eq!(page.status, StatusCode::FOUND);
    assert_eq!(page.location.as_deref(), Some("/login"));
    assert!(!client.has_session());

    let page = client.get(&app, "/login").await?;
    assert!(page.body.contains(MSG_LOGGED_OUT));
    assert!(page.body.contains("alert-info"));

    let page = client.get(&app, "/index").await?;
    assert_eq!(page.status, StatusCode::FOUND);
    assert_eq!(page.location.as_deref(), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn index_requires_session() -> Result<()> {
    let app = app(Arc::new(MemoryStore::default()), AuthConfig::new())?;
    let page = Client::default().get(&app, "/index").await?;
    assert_eq!(page.status, StatusCode::FOUND);
    assert_eq!(page.location.as_deref(), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn tampered_session_is_rejected() -> Result<()> {
    let app = app(Arc::new(MemoryStore::default()), AuthConfig::new())?;
    let mut client = Client::default();
    register(&mut client, &app, "alice", "secret1").await?;

    let token = client
        .cookies
        .get(SESSION_COOKIE_NAME)
        .cloned()
        .ok_or_else(|| anyhow!("no session"))?;
    let (_, signature) = token.split_once('.').ok_or_else(|| anyhow!("bad token"))?;
    // claim to be someone else, keeping alice's signature
    let forged_payload =
        Base64UrlUnpadded::encode_string(br#"{"username":"mallory","issued_at":0}"#);
    client.cookies.insert(
        SESSION_COOKIE_NAME.to_string(),
        format!("{forged_payload}.{signature}"),
    );

    let page = client.get(&app, "/index").await?;
    assert_eq!(page.status, StatusCode::FOUND);
    assert_eq!(page.location.as_deref(), Some("/login"));

    // a session signed with another key is rejected too
    let other_app = router(
        Arc::new(MemoryStore::default()),
        Arc::new(AuthState::new(
            AuthConfig::new(),
            SecretString::from("another-secret-key-another-secret".to_string()),
        )),
    );
    let mut client = Client::default();
    register(&mut client, &app, "bob1", "secret1").await?;
    let page = client.get(&other_app, "/index").await?;
    assert_eq!(page.status, StatusCode::FOUND);
    Ok(())
}

#[tokio::test]
async fn validation_errors_rerender_the_form() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let app = app(store.clone(), AuthConfig::new())?;
    let mut client = Client::default();
    client.get(&app, "/register").await?;

    let page = client
        .post(
            &app,
            "/register",
            &[
                ("username", "abc"),
                ("password", "secret1"),
                ("confirm_password", "secret2"),
            ],
        )
        .await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page
        .body
        .contains("Field must be between 4 and 20 characters long."));
    assert!(page.body.contains("Passwords must match"));
    assert!(!page.body.contains("secret1"));
    assert!(store.users().is_empty());

    let page = client.post(&app, "/login", &[]).await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("This field is required."));
    Ok(())
}

#[tokio::test]
async fn repeated_fields_use_the_first_value() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let app = app(store.clone(), AuthConfig::new())?;
    register(&mut Client::default(), &app, "alice", "secret1").await?;

    let mut client = Client::default();
    client.get(&app, "/login").await?;
    let page = client
        .post(
            &app,
            "/login",
            &[
                ("username", "alice"),
                ("username", "bob1"),
                ("password", "secret1"),
            ],
        )
        .await?;
    assert_eq!(page.status, StatusCode::FOUND);
    assert_eq!(page.location.as_deref(), Some("/index"));
    assert!(client.has_session());

    let page = client.get(&app, "/index").await?;
    assert!(page.body.contains("Welcome, alice!"));
    Ok(())
}

#[tokio::test]
async fn body_without_form_content_type_rerenders_the_form() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let app = app(store.clone(), AuthConfig::new())?;
    let mut client = Client::default();
    client.get(&app, "/register").await?;

    let request = client
        .request("POST", "/register")
        .body(Body::from("username=alice&password=secret1&confirm_password=secret1"))?;
    let page = client.send(&app, request).await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("This field is required."));
    assert!(page.body.contains(r#"name="csrf_token""#));

    let request = client
        .request("POST", "/login")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"username":"alice","password":"secret1"}"#))?;
    let page = client.send(&app, request).await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("This field is required."));

    assert!(store.users().is_empty());
    assert!(!client.has_session());
    Ok(())
}

#[tokio::test]
async fn repeated_logouts_keep_the_flash_cookie_small() -> Result<()> {
    let app = app(Arc::new(MemoryStore::default()), AuthConfig::new())?;
    let mut client = Client::default();

    for _ in 0..50 {
        let page = client.get(&app, "/logout").await?;
        assert_eq!(page.status, StatusCode::FOUND);
    }
    let flash = client
        .cookies
        .get(FLASH_COOKIE_NAME)
        .ok_or_else(|| anyhow!("no flash cookie"))?;
    assert!(flash.len() < 1024);

    let page = client.get(&app, "/login").await?;
    assert_eq!(page.body.matches(MSG_LOGGED_OUT).count(), 1);
    Ok(())
}

#[tokio::test]
async fn csrf_token_is_required() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let app = app(store.clone(), AuthConfig::new())?;
    let mut client = Client::default();
    client.get(&app, "/register").await?;

    let fields = [
        ("username", "alice"),
        ("password", "secret1"),
        ("confirm_password", "secret1"),
    ];

    let page = client.post_raw(&app, "/register", &fields).await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains(&CsrfError::Missing.to_string()));

    let mut forged = fields.to_vec();
    forged.push(("csrf_token", "not-a-token"));
    let page = client.post_raw(&app, "/register", &forged).await?;
    assert!(page.body.contains(&CsrfError::Invalid.to_string()));

    // a token served to another client does not match this client's nonce
    let mut attacker = Client::default();
    attacker.get(&app, "/register").await?;
    let stolen = attacker.csrf_token.clone().ok_or_else(|| anyhow!("no token"))?;
    let mut replayed = fields.to_vec();
    replayed.push(("csrf_token", stolen.as_str()));
    let page = client.post_raw(&app, "/register", &replayed).await?;
    assert!(page.body.contains(&CsrfError::Invalid.to_string()));

    assert!(store.users().is_empty());
    assert!(!client.has_session());
    Ok(())
}

#[tokio::test]
async fn csrf_can_be_disabled() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let app = app(store.clone(), AuthConfig::new().with_csrf_enabled(false))?;

    let page = Client::default()
        .post_raw(
            &app,
            "/register",
            &[
                ("username", "alice"),
                ("password", "secret1"),
                ("confirm_password", "secret1"),
            ],
        )
        .await?;
    assert_eq!(page.status, StatusCode::FOUND);
    assert_eq!(store.users().len(), 1);
    Ok(())
}

#[tokio::test]
async fn strict_status_codes() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let app = app(store, AuthConfig::new().with_strict_status(true))?;

    let page = register(&mut Client::default(), &app, "al", "secret1").await?;
    assert_eq!(page.status, StatusCode::UNPROCESSABLE_ENTITY);

    let page = register(&mut Client::default(), &app, "alice", "secret1").await?;
    assert_eq!(page.status, StatusCode::FOUND);

    let page = register(&mut Client::default(), &app, "alice", "secret1").await?;
    assert_eq!(page.status, StatusCode::CONFLICT);
    assert!(page.body.contains(MSG_USERNAME_TAKEN));

    let page = login(&mut Client::default(), &app, "alice", "wrongpass").await?;
    assert_eq!(page.status, StatusCode::UNAUTHORIZED);
    assert!(page.body.contains(MSG_LOGIN_FAILED));
    Ok(())
}

#[tokio::test]
async fn insert_conflict_reported_as_existing_user() -> Result<()> {
    let store = Arc::new(MemoryStore::stale());
    let app = app(store.clone(), AuthConfig::new())?;

    let page = register(&mut Client::default(), &app, "alice", "secret1").await?;
    assert_eq!(page.status, StatusCode::FOUND);

    let mut client = Client::default();
    let page = register(&mut client, &app, "alice", "secret1").await?;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains(MSG_USERNAME_TAKEN));
    assert!(!client.has_session());
    assert_eq!(store.users().len(), 1);
    Ok(())
}

#[tokio::test]
async fn store_failure_is_internal_error() -> Result<()> {
    let app = app(Arc::new(MemoryStore::unavailable()), AuthConfig::new())?;

    let page = register(&mut Client::default(), &app, "alice", "secret1").await?;
    assert_eq!(page.status, StatusCode::INTERNAL_SERVER_ERROR);

    let page = login(&mut Client::default(), &app, "alice", "secret1").await?;
    assert_eq!(page.status, StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}

#[tokio::test]
async fn session_cookie_attributes() -> Result<()> {
    let app = app(
        Arc::new(MemoryStore::default()),
        AuthConfig::new().with_cookie_secure(true),
    )?;
    let page = register(&mut Client::default(), &app, "alice", "secret1").await?;

    let session = page
        .set_cookies
        .iter()
        .find(|cookie| cookie.starts_with(&format!("{SESSION_COOKIE_NAME}=")))
        .ok_or_else(|| anyhow!("no session cookie"))?;
    assert!(session.contains("HttpOnly"));
    assert!(session.contains("SameSite=Lax"));
    assert!(session.contains("Secure"));
    assert!(!session.contains("alice"));
    Ok(())
}

#[tokio::test]
async fn health_reports_database_state() -> Result<()> {
    let app = app(Arc::new(MemoryStore::default()), AuthConfig::new())?;
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let x_app = response
        .headers()
        .get("X-App")
        .ok_or_else(|| anyhow!("missing X-App"))?
        .to_str()?;
    assert!(x_app.starts_with(concat!(env!("CARGO_PKG_NAME"), ":")));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let health: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(health["database"], "ok");
    assert_eq!(health["name"], env!("CARGO_PKG_NAME"));

    let app = self::app(Arc::new(MemoryStore::unavailable()), AuthConfig::new())?;
    let response = app
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri("/health")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn request_id_is_propagated() -> Result<()> {
    let app = app(Arc::new(MemoryStore::default()), AuthConfig::new())?;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/login")
                .header("x-request-id", "req-123")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .map(|value| value.to_str().unwrap_or_default()),
        Some("req-123")
    );
    Ok(())
}
