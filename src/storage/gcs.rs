//! Google Cloud Storage backend (JSON API).
//!
//! Uploads use a resumable session: the body is sent in fixed-size chunks and
//! the last request carries the total length, which is what finalizes the
//! object. Until then nothing is visible in the bucket, so an aborted upload
//! never shows up as a complete object.

use super::{
    ByteStream, ObjectAttributes, ObjectStore, StorageError, StorageResult,
    credentials::TokenProvider, ensure_key_safe,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{StatusCode, Url, header};
use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_API_BASE: &str = "https://storage.googleapis.com";

/// Every non-final chunk must be a multiple of 256 KiB.
const UPLOAD_CHUNK_SIZE: usize = 32 * 256 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    /// int64 encoded as a string by the JSON API.
    size: String,
    content_type: Option<String>,
    md5_hash: Option<String>,
}

pub struct GcsObjectStore {
    bucket: String,
    api_base: Url,
    client: reqwest::Client,
    tokens: TokenProvider,
}

impl GcsObjectStore {
    pub fn new(
        bucket: impl Into<String>,
        api_base: &str,
        client: reqwest::Client,
        tokens: TokenProvider,
    ) -> StorageResult<Self> {
        let api_base = Url::parse(api_base)
            .map_err(|err| StorageError::Config(format!("api base `{}`: {}", api_base, err)))?;
        if api_base.cannot_be_a_base() {
            return Err(StorageError::Config(format!(
                "api base `{}` cannot hold paths",
                api_base
            )));
        }
        Ok(Self {
            bucket: bucket.into(),
            api_base,
            client,
            tokens,
        })
    }

    fn url_with_segments(&self, segments: &[&str]) -> StorageResult<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Config("api base cannot hold paths".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, key: &str) -> StorageResult<Url> {
        self.url_with_segments(&["storage", "v1", "b", &self.bucket, "o", key])
    }

    async fn start_session(&self, key: &str, content_type: Option<&str>) -> StorageResult<Url> {
        let mut url =
            self.url_with_segments(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("name", key);

        let token = self.tokens.access_token().await?;
        let mut request = self.client.post(url).bearer_auth(token);
        if let Some(content_type) = content_type {
            request = request.header("X-Upload-Content-Type", content_type);
        }
        let response = ensure_success(request.json(&serde_json::json!({ "name": key })).send().await?).await?;

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StorageError::Remote {
                status: response.status().as_u16(),
                message: "resumable session response carried no Location".into(),
            })?;
        Url::parse(location).map_err(|err| StorageError::Remote {
            status: response.status().as_u16(),
            message: format!("invalid session location: {}", err),
        })
    }

    /// Send one intermediate chunk; the session must answer 308 and report
    /// every byte so far as persisted.
    async fn put_chunk(
        &self,
        session: &Url,
        key: &str,
        offset: u64,
        chunk: Bytes,
    ) -> StorageResult<()> {
        let len = chunk.len();
        let response = self
            .client
            .put(session.clone())
            .header(header::CONTENT_RANGE, content_range(offset, len, None))
            .body(chunk)
            .send()
            .await?;

        if response.status() != StatusCode::PERMANENT_REDIRECT {
            return Err(remote_error(response).await);
        }
        let expected_end = offset + len as u64;
        let persisted = response
            .headers()
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(persisted_length)
            .unwrap_or(0);
        if persisted != expected_end {
            return Err(StorageError::NotFinalized {
                key: key.to_string(),
                reason: format!("session persisted {} of {} bytes", persisted, expected_end),
            });
        }
        Ok(())
    }

    async fn finalize(
        &self,
        session: &Url,
        key: &str,
        offset: u64,
        rest: Bytes,
    ) -> StorageResult<()> {
        let total = offset + rest.len() as u64;
        let response = self
            .client
            .put(session.clone())
            .header(header::CONTENT_RANGE, content_range(offset, rest.len(), Some(total)))
            .body(rest)
            .send()
            .await?;

        if response.status().is_success() {
            debug!(key, total, "finalized resumable upload");
            Ok(())
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            Err(StorageError::NotFinalized {
                key: key.to_string(),
                reason: format!("{}: {}", status, message),
            })
        }
    }

    async fn cancel_session(&self, session: &Url) {
        if let Err(err) = self.client.delete(session.clone()).send().await {
            warn!("failed to cancel resumable session: {}", err);
        }
    }

    async fn stream_into_session(
        &self,
        session: &Url,
        key: &str,
        mut body: ByteStream<'_>,
    ) -> StorageResult<()> {
        let mut buffer = BytesMut::with_capacity(UPLOAD_CHUNK_SIZE);
        let mut offset: u64 = 0;
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
            while buffer.len() >= UPLOAD_CHUNK_SIZE {
                let part = buffer.split_to(UPLOAD_CHUNK_SIZE).freeze();
                self.put_chunk(session, key, offset, part).await?;
                offset += UPLOAD_CHUNK_SIZE as u64;
            }
        }
        self.finalize(session, key, offset, buffer.freeze()).await
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn scheme(&self) -> &'static str {
        "gs"
    }

    async fn upload(
        &self,
        key: &str,
        content_type: Option<&str>,
        body: ByteStream<'_>,
    ) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let session = self.start_session(key, content_type).await?;
        let result = self.stream_into_session(&session, key, body).await;
        if result.is_err() {
            self.cancel_session(&session).await;
        }
        result
    }

    async fn attributes(&self, key: &str) -> StorageResult<ObjectAttributes> {
        ensure_key_safe(key)?;
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .get(self.object_url(key)?)
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::ObjectNotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            });
        }
        let object: GcsObject = ensure_success(response).await?.json().await?;
        let size = object.size.parse::<u64>().map_err(|err| StorageError::Remote {
            status: 200,
            message: format!("invalid object size `{}`: {}", object.size, err),
        })?;

        Ok(ObjectAttributes {
            size,
            content_type: object.content_type,
            md5: object.md5_hash,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .delete(self.object_url(key)?)
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(key, "object already absent");
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }
}

async fn ensure_success(response: reqwest::Response) -> StorageResult<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(remote_error(response).await)
    }
}

async fn remote_error(response: reqwest::Response) -> StorageError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    StorageError::Remote { status, message }
}

/// `Content-Range` value for a chunk starting at `offset`.
///
/// An unknown total (`*`) keeps the session open; a known total finalizes it.
/// An empty final chunk is expressed as `bytes */<total>`.
fn content_range(offset: u64, len: usize, total: Option<u64>) -> String {
    let total = total.map_or_else(|| "*".to_string(), |t| t.to_string());
    if len == 0 {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", offset, offset + len as u64 - 1, total)
    }
}

/// Number of bytes a session reports as persisted from its `Range: bytes=0-N`
/// header.
fn persisted_length(range: &str) -> Option<u64> {
    let (start, end) = range.strip_prefix("bytes=")?.split_once('-')?;
    if start != "0" {
        return None;
    }
    end.parse::<u64>().ok().map(|end| end + 1)
}
