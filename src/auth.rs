//! HTTP Basic authentication guard.
//!
//! One [`Authenticator`] is chosen from `AUTH_MODE` at startup and installed
//! as a middleware in front of the protected routes.

use crate::{config::AuthMode, db, errors::AppError, services::user_service::hash_password};
use anyhow::Context;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use base64::Engine;
use sqlx::SqlitePool;
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Decode an `Authorization: Basic <base64(user:pass)>` value. Anything
    /// malformed yields `None`.
    pub fn from_authorization(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?;
        let (scheme, encoded) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim().as_bytes())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Allow,
    Deny,
}

/// The credential store itself failed; distinct from a wrong password.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential store: {0}")]
    Store(#[from] sqlx::Error),
    #[error("password check: {0}")]
    Hash(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: Option<&Credentials>)
    -> Result<AuthOutcome, AuthError>;
}

/// Lets every request through.
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn authenticate(
        &self,
        _credentials: Option<&Credentials>,
    ) -> Result<AuthOutcome, AuthError> {
        Ok(AuthOutcome::Allow)
    }
}

/// A single username/password pair from the environment.
///
/// Only a bcrypt hash of the password is kept, so checking a request costs a
/// `bcrypt::verify` rather than a plain string comparison.
pub struct StaticCredentials {
    username: String,
    password_hash: String,
}

impl StaticCredentials {
    pub async fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        hash_cost: u32,
    ) -> Result<Self, AuthError> {
        let password = password.into();
        let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, hash_cost))
            .await
            .map_err(|err| AuthError::Hash(err.to_string()))?
            .map_err(|err| AuthError::Hash(err.to_string()))?;
        Ok(Self {
            username: username.into(),
            password_hash,
        })
    }
}

#[async_trait]
impl Authenticator for StaticCredentials {
    async fn authenticate(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<AuthOutcome, AuthError> {
        let Some(credentials) = credentials else {
            return Ok(AuthOutcome::Deny);
        };

        // Verify even on a username mismatch so both cases take the same time.
        let valid = verify_password(&credentials.password, &self.password_hash).await?;
        Ok(if valid && credentials.username == self.username {
            AuthOutcome::Allow
        } else {
            AuthOutcome::Deny
        })
    }
}

async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|err| AuthError::Hash(err.to_string()))?
        .map_err(|err| AuthError::Hash(err.to_string()))
}

/// Looks the username up in the users table and checks the bcrypt hash.
pub struct DatabaseCredentials {
    db: SqlitePool,
}

impl DatabaseCredentials {
    /// Make sure the users table exists and holds the seed account.
    ///
    /// The seed is only inserted when no user with that name exists, so a
    /// changed password survives restarts.
    pub async fn initialize(
        db: SqlitePool,
        seed_username: &str,
        seed_password: &str,
        hash_cost: u32,
    ) -> anyhow::Result<Self> {
        db::run_migrations(&db)
            .await
            .context("ensuring users table")?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE username = ?")
            .bind(seed_username)
            .fetch_optional(&db)
            .await?;
        if exists.is_none() {
            let hash = hash_password(seed_password.to_string(), hash_cost).await?;
            let now = chrono::Utc::now();
            sqlx::query(
                "INSERT INTO users
                   (id, first_name, last_name, username, password_hash, account_created, account_updated)
                 VALUES (?, 'Default', 'Admin', ?, ?, ?, ?)
                 ON CONFLICT (username) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(seed_username)
            .bind(&hash)
            .bind(now)
            .bind(now)
            .execute(&db)
            .await
            .context("seeding default account")?;
            info!(username = seed_username, "seeded default account");
        }

        Ok(Self { db })
    }
}

#[async_trait]
impl Authenticator for DatabaseCredentials {
    async fn authenticate(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<AuthOutcome, AuthError> {
        let Some(credentials) = credentials else {
            return Ok(AuthOutcome::Deny);
        };

        let hash: Option<String> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE username = ?")
                .bind(&credentials.username)
                .fetch_optional(&self.db)
                .await?;
        let Some(hash) = hash else {
            debug!(username = %credentials.username, "unknown user");
            return Ok(AuthOutcome::Deny);
        };

        let valid = verify_password(&credentials.password, &hash).await?;

        Ok(if valid {
            AuthOutcome::Allow
        } else {
            AuthOutcome::Deny
        })
    }
}

/// Resolve the configured mode into the guard used for the process lifetime.
pub async fn build_authenticator(
    mode: &AuthMode,
    db: &SqlitePool,
    hash_cost: u32,
) -> anyhow::Result<Arc<dyn Authenticator>> {
    let authenticator: Arc<dyn Authenticator> = match mode {
        AuthMode::None => {
            info!("authentication disabled");
            Arc::new(NoAuth)
        }
        AuthMode::Static { username, password } => {
            info!(username = %username, "static basic authentication");
            Arc::new(
                StaticCredentials::new(username, password, hash_cost)
                    .await
                    .context("hashing static password")?,
            )
        }
        AuthMode::Database {
            seed_username,
            seed_password,
        } => {
            info!("database-backed basic authentication");
            Arc::new(
                DatabaseCredentials::initialize(db.clone(), seed_username, seed_password, hash_cost)
                    .await?,
            )
        }
    };
    Ok(authenticator)
}

/// Middleware: 401 with a challenge on missing/bad credentials, 500 when the
/// credential store fails, otherwise the request passes through untouched.
pub async fn require_basic_auth(
    State(authenticator): State<Arc<dyn Authenticator>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let credentials = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(Credentials::from_authorization);

    match authenticator.authenticate(credentials.as_ref()).await? {
        AuthOutcome::Allow => Ok(next.run(request).await),
        AuthOutcome::Deny => Err(AppError::unauthorized()),
    }
}
