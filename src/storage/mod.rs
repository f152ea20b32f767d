//! Object storage gateway.
//!
//! The database row of a trace only carries a URI; the payload lives behind an
//! [`ObjectStore`]. One handle is built at startup from configuration and
//! shared by every request, bound to a single bucket.
//!
//! Two backends exist:
//! - [`local::LocalObjectStore`]: files on disk, used for development/tests.
//! - [`gcs::GcsObjectStore`]: Google Cloud Storage JSON API.

pub mod credentials;
pub mod gcs;
pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{io, path::Path};
use thiserror::Error;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Streamed request body handed to [`ObjectStore::upload`].
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// What the store knows about a committed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub size: u64,
    pub content_type: Option<String>,
    /// Hex (local) or base64 (GCS) MD5 digest, when the backend reports one.
    pub md5: Option<String>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("upload of `{key}` was not finalized: {reason}")]
    NotFinalized { key: String, reason: String },
    #[error("object store returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("object store credentials: {0}")]
    Credentials(String),
    #[error("object store configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Bucket/object API used by the trace life cycle.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket every key is resolved against.
    fn bucket(&self) -> &str;

    /// URI scheme used in bucket paths (`gs`, `local`).
    fn scheme(&self) -> &'static str;

    /// Stream `body` into `key`.
    ///
    /// Returns only once the object is committed; a failed finalize is an
    /// upload failure and must leave no visible object behind.
    async fn upload(
        &self,
        key: &str,
        content_type: Option<&str>,
        body: ByteStream<'_>,
    ) -> StorageResult<()>;

    /// Size / content type of a committed object, or `ObjectNotFound`.
    async fn attributes(&self, key: &str) -> StorageResult<ObjectAttributes>;

    /// Remove `key`. Deleting an object that is already gone succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// `<scheme>://<bucket>/<key>`, the value stored as a trace's bucket path.
    fn object_uri(&self, key: &str) -> String {
        format!("{}://{}/{}", self.scheme(), self.bucket(), key)
    }
}

/// Fresh object key for an uploaded file: a random UUID plus the original
/// extension, so two uploads of the same filename never collide.
pub fn object_key_for(file_name: &str) -> String {
    let id = Uuid::new_v4();
    match Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
    {
        Some(ext) => format!("{}.{}", id, ext.to_ascii_lowercase()),
        None => id.to_string(),
    }
}

/// Extract the object key (final path segment) from a stored bucket path.
///
/// Returns `None` for anything that is not `<scheme>://<bucket>/<key>`.
pub fn key_from_bucket_path(bucket_path: &str) -> Option<&str> {
    let (_, rest) = bucket_path.split_once("://")?;
    let (bucket, key) = rest.rsplit_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some(key)
}

/// Keys are flat names; reject anything that could escape the bucket root.
pub(crate) fn ensure_key_safe(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.starts_with('.') || key.contains('/') || key.contains("..") {
        return Err(StorageError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidObjectKey);
    }
    Ok(())
}
