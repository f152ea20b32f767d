//! Filesystem-backed object store.
//!
//! Objects live at `base_dir/{bucket}/{key}`; a JSON sidecar under
//! `base_dir/{bucket}/.meta/{key}.json` keeps the content type and MD5 that a
//! real bucket would report as object attributes.

use super::{
    ByteStream, ObjectAttributes, ObjectStore, StorageError, StorageResult, ensure_key_safe,
};
use async_trait::async_trait;
use futures::StreamExt;
use md5::Context;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const META_DIR: &str = ".meta";

#[derive(Serialize, Deserialize, Debug)]
struct Sidecar {
    content_type: Option<String>,
    md5: String,
}

/// Unlinks an uncommitted file when dropped, which covers an upload
/// future cancelled mid-stream.
struct TempUpload {
    path: PathBuf,
    armed: bool,
}

impl TempUpload {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed temp file {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove temp file {}: {}", self.path.display(), err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    bucket: String,
    root: PathBuf,
}

impl LocalObjectStore {
    /// Open (creating if needed) the bucket directory beneath `base_dir`.
    pub async fn new(base_dir: impl AsRef<Path>, bucket: impl Into<String>) -> io::Result<Self> {
        let bucket = bucket.into();
        let root = base_dir.as_ref().join(&bucket);
        fs::create_dir_all(root.join(META_DIR)).await?;
        Ok(Self { bucket, root })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key))
    }

    fn not_found(&self, key: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn scheme(&self) -> &'static str {
        "local"
    }

    /// Writes into a temp file, fsyncs, then renames into place; the rename is
    /// the commit point.
    async fn upload(
        &self,
        key: &str,
        content_type: Option<&str>,
        mut body: ByteStream<'_>,
    ) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let tmp = TempUpload::new(self.root.join(format!(".tmp-{}", Uuid::new_v4())));
        let mut file = File::create(&tmp.path).await?;

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let encoded = serde_json::to_vec(&Sidecar {
            content_type: content_type.map(str::to_string),
            md5: format!("{:x}", digest.compute()),
        })
        .map_err(io::Error::from)?;
        let sidecar = TempUpload::new(self.sidecar_path(key));
        fs::write(&sidecar.path, encoded).await?;

        if let Err(err) = fs::rename(&tmp.path, &file_path).await {
            return Err(StorageError::NotFinalized {
                key: key.to_string(),
                reason: err.to_string(),
            });
        }
        tmp.commit();
        sidecar.commit();

        debug!(key, size_bytes, "committed local object");
        Ok(())
    }

    async fn attributes(&self, key: &str) -> StorageResult<ObjectAttributes> {
        ensure_key_safe(key)?;
        let meta = fs::metadata(self.object_path(key))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => self.not_found(key),
                _ => StorageError::Io(err),
            })?;

        let sidecar = match fs::read(self.sidecar_path(key)).await {
            Ok(bytes) => serde_json::from_slice::<Sidecar>(&bytes).ok(),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(StorageError::Io(err)),
        };

        Ok(ObjectAttributes {
            size: meta.len(),
            content_type: sidecar.as_ref().and_then(|s| s.content_type.clone()),
            md5: sidecar.map(|s| s.md5),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        match fs::remove_file(self.sidecar_path(key)).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn body(parts: Vec<&'static [u8]>) -> ByteStream<'static> {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p)))).boxed()
    }

    #[tokio::test]
    async fn upload_then_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "traces").await.unwrap();

        store
            .upload(
                "a.pdf",
                Some("application/pdf"),
                body(vec![&b"%PDF-"[..], &b"1.4"[..]]),
            )
            .await
            .unwrap();

        let attrs = store.attributes("a.pdf").await.unwrap();
        assert_eq!(attrs.size, 8);
        assert_eq!(attrs.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(
            attrs.md5.as_deref(),
            Some(format!("{:x}", md5::compute(b"%PDF-1.4")).as_str())
        );
        assert_eq!(store.object_uri("a.pdf"), "local://traces/a.pdf");
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "traces").await.unwrap();

        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ])
        .boxed();

        let err = store.upload("b.pdf", None, failing).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(matches!(
            store.attributes("b.pdf").await,
            Err(StorageError::ObjectNotFound { .. })
        ));

        let mut entries = fs::read_dir(dir.path().join("traces")).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name();
            assert!(!name.to_string_lossy().starts_with(".tmp-"));
        }
    }

    fn bucket_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir.join("traces"))
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn cancelled_upload_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "traces").await.unwrap();

        // One chunk, then a client that never sends the rest.
        let stalled = stream::iter(vec![Ok(Bytes::from_static(b"%PDF-"))])
            .chain(stream::pending())
            .boxed();
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.upload("k.pdf", None, stalled),
        )
        .await;
        assert!(outcome.is_err());

        assert_eq!(bucket_entries(dir.path()), vec![META_DIR.to_string()]);
        assert!(
            std::fs::read_dir(dir.path().join("traces").join(META_DIR))
                .unwrap()
                .next()
                .is_none()
        );
    }

    #[tokio::test]
    async fn committed_upload_keeps_its_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "traces").await.unwrap();
        store.upload("d.pdf", None, body(vec![&b"x"[..]])).await.unwrap();

        let mut entries = bucket_entries(dir.path());
        entries.sort();
        assert_eq!(entries, vec![META_DIR.to_string(), "d.pdf".to_string()]);
        assert!(store.sidecar_path("d.pdf").exists());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "traces").await.unwrap();
        store.upload("c.pdf", None, body(vec![&b"x"[..]])).await.unwrap();

        store.delete("c.pdf").await.unwrap();
        store.delete("c.pdf").await.unwrap();
        assert!(matches!(
            store.attributes("c.pdf").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn traversal_keys_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "traces").await.unwrap();
        assert!(matches!(
            store.delete("../escape").await,
            Err(StorageError::InvalidObjectKey)
        ));
    }
}
