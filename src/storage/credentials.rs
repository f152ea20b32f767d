//! Access-token acquisition for Google Cloud Storage.
//!
//! The strategy is picked once at startup from the deployment environment:
//! a local run with a key file signs its own JWT bearer grant, everything
//! else asks the instance metadata server (workload identity).

use super::{StorageError, StorageResult};
use crate::config::DeploymentEnvironment;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Tokens are refreshed this long before they actually expire.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStrategy {
    ServiceAccountKey(PathBuf),
    MetadataServer,
}

impl CredentialStrategy {
    pub fn select(environment: DeploymentEnvironment, key_path: Option<&Path>) -> Self {
        match (environment, key_path) {
            (DeploymentEnvironment::Local, Some(path)) => Self::ServiceAccountKey(path.into()),
            _ => Self::MetadataServer,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

enum Source {
    Key {
        key: ServiceAccountKey,
        signing_key: EncodingKey,
    },
    Metadata,
}

/// Hands out bearer tokens, caching the current one until shortly before it
/// expires.
pub struct TokenProvider {
    source: Source,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Resolve `strategy`. A key file is read and parsed here so a bad file
    /// fails startup instead of the first upload.
    pub async fn from_strategy(
        strategy: &CredentialStrategy,
        client: reqwest::Client,
    ) -> StorageResult<Self> {
        let source = match strategy {
            CredentialStrategy::ServiceAccountKey(path) => {
                let raw = tokio::fs::read(path).await.map_err(|err| {
                    StorageError::Credentials(format!("reading {}: {}", path.display(), err))
                })?;
                let key = parse_service_account_key(&raw)?;
                let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
                    .map_err(|err| StorageError::Credentials(err.to_string()))?;
                info!(client_email = %key.client_email, "using service account key credentials");
                Source::Key { key, signing_key }
            }
            CredentialStrategy::MetadataServer => {
                info!("using metadata server (workload identity) credentials");
                Source::Metadata
            }
        };

        Ok(Self {
            source,
            client,
            cached: Mutex::new(None),
        })
    }

    pub async fn access_token(&self) -> StorageResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let token = self.fetch().await?;
        debug!(expires_at = %token.expires_at, "refreshed storage access token");
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch(&self) -> StorageResult<CachedToken> {
        let now = Utc::now();
        let response = match &self.source {
            Source::Key { key, signing_key } => {
                let claims = GrantClaims {
                    iss: &key.client_email,
                    scope: STORAGE_SCOPE,
                    aud: &key.token_uri,
                    iat: now.timestamp(),
                    exp: now.timestamp() + 3600,
                };
                let assertion =
                    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, signing_key)
                        .map_err(|err| StorageError::Credentials(err.to_string()))?;
                self.client
                    .post(&key.token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
                    .send()
                    .await?
            }
            Source::Metadata => {
                self.client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Credentials(format!(
                "token endpoint returned {}: {}",
                status, message
            )));
        }

        let body: TokenResponse = response.json().await?;
        Ok(CachedToken {
            value: body.access_token,
            expires_at: now + Duration::seconds(body.expires_in),
        })
    }
}

fn parse_service_account_key(raw: &[u8]) -> StorageResult<ServiceAccountKey> {
    serde_json::from_slice(raw)
        .map_err(|err| StorageError::Credentials(format!("invalid service account key: {}", err)))
}
