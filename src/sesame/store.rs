//! Credential store.
//!
//! Handlers only see the [`UserStore`] trait; [`PgUserStore`] is the Postgres
//! implementation backed by the `users` table in `sql/schema.sql`.

use sqlx::{postgres::PgPoolOptions, Connection, PgPool, Row};
use std::{future::Future, pin::Pin, time::Duration};
use thiserror::Error;
use tracing::{info_span, Instrument};

/// A stored credential. `password_hash` is never the raw password.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password_hash: String,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password_hash", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    /// No connection could be obtained (pool exhausted or closed, backend down).
    #[error("credential store unavailable")]
    Unavailable,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::Unavailable,
            err => Self::Database(err),
        }
    }
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

pub trait UserStore: Send + Sync {
    /// Exact-match lookup.
    fn find_by_username<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<User>>;

    /// Append a user; a username that is already taken yields
    /// [`InsertOutcome::AlreadyExists`], even when two inserts race.
    fn insert<'a>(
        &'a self,
        username: &'a str,
        password_hash: &'a str,
    ) -> StoreFuture<'a, InsertOutcome>;

    /// Check the store is reachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `dsn`.
    ///
    /// # Errors
    /// Returns an error if no connection can be established.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await?;

        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl UserStore for PgUserStore {
    fn find_by_username<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<User>> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.table = "users"
            );
            let row = sqlx::query("SELECT username, password FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await?;

            Ok(row.map(|row| User {
                username: row.get("username"),
                password_hash: row.get("password"),
            }))
        })
    }

    fn insert<'a>(
        &'a self,
        username: &'a str,
        password_hash: &'a str,
    ) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.table = "users"
            );
            match sqlx::query("INSERT INTO users (username, password) VALUES ($1, $2)")
                .bind(username)
                .bind(password_hash)
                .execute(&self.pool)
                .instrument(span)
                .await
            {
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::AlreadyExists),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let acquire_span = info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            );
            let mut conn = self.pool.acquire().instrument(acquire_span).await?;

            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            conn.ping().instrument(ping_span).await?;

            Ok(())
        })
    }
}

/// SQLSTATE 23505, `unique_violation`.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
