//! Trace life cycle: a database row plus one blob in the object store.
//!
//! Creation is split in two so the HTTP layer can stream the file straight
//! from the multipart body: [`TraceService::upload`] commits the blob and
//! [`TraceService::record`] writes the row. If anything fails after the blob
//! is committed, the blob is deleted again before the error is returned.
//! Deletion is the reverse and tolerates a blob that is already gone.
//!
//! A request can be dropped at any await point (client gone, request
//! timeout). [`PendingObject`] covers the window between the two steps: once
//! the blob is committed it is either recorded on a detached task or
//! discarded, even when the caller never resumes.

use super::{ServiceError, ServiceResult};
use crate::{
    models::trace::{Trace, TraceInput},
    storage::{ByteStream, ObjectStore, key_from_bucket_path, object_key_for},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{Instrument, debug, info, instrument, warn};
use uuid::Uuid;

const TRACE_COLUMNS: &str = "id, user_id, file_name, date_created, bucket_path";

/// A committed blob that has no row yet.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub file_name: String,
    pub bucket_path: String,
}

/// A committed blob owned by an in-flight create request.
///
/// Dropping it without calling [`PendingObject::record`] or
/// [`PendingObject::discard`] schedules the discard on the runtime.
pub struct PendingObject {
    traces: TraceService,
    object: Option<StoredObject>,
}

impl PendingObject {
    pub fn new(traces: TraceService, object: StoredObject) -> Self {
        Self {
            traces,
            object: Some(object),
        }
    }

    pub fn object(&self) -> Option<&StoredObject> {
        self.object.as_ref()
    }

    /// Write the row on a spawned task, so the row or the compensation
    /// happens even if this future is dropped while waiting.
    pub async fn record(mut self, user_id: Option<Uuid>) -> ServiceResult<Trace> {
        let object = self
            .object
            .take()
            .ok_or_else(|| ServiceError::Internal("object already released".into()))?;
        let traces = self.traces.clone();
        tokio::spawn(async move { traces.record(object, user_id).await }.in_current_span())
            .await
            .map_err(|err| ServiceError::Internal(format!("record task failed: {}", err)))?
    }

    pub async fn discard(mut self) {
        if let Some(object) = self.object.take() {
            self.traces.discard(&object).await;
        }
    }
}

impl Drop for PendingObject {
    fn drop(&mut self) {
        let Some(object) = self.object.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                warn!(key = %object.key, "create abandoned, discarding object");
                let traces = self.traces.clone();
                handle.spawn(async move { traces.discard(&object).await });
            }
            Err(_) => warn!(key = %object.key, "no runtime to discard abandoned object"),
        }
    }
}

#[derive(Clone)]
pub struct TraceService {
    db: SqlitePool,
    store: Arc<dyn ObjectStore>,
}

impl TraceService {
    pub fn new(db: SqlitePool, store: Arc<dyn ObjectStore>) -> Self {
        Self { db, store }
    }

    /// Only PDFs are accepted, compared case-insensitively.
    pub fn accepts_file_name(file_name: &str) -> bool {
        file_name.len() > ".pdf".len() && file_name.to_ascii_lowercase().ends_with(".pdf")
    }

    pub async fn list(&self) -> ServiceResult<Vec<Trace>> {
        let rows = sqlx::query_as::<_, Trace>(&format!(
            "SELECT {} FROM traces ORDER BY date_created, id",
            TRACE_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Trace> {
        sqlx::query_as::<_, Trace>(&format!("SELECT {} FROM traces WHERE id = ?", TRACE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(ServiceError::NotFound { entity: "trace", id })
    }

    /// Stream `body` into a freshly keyed object.
    ///
    /// Nothing is written to the database here. A failed upload leaves
    /// neither a row nor a visible object.
    #[instrument(name = "upload", skip(self, body), fields(key))]
    pub async fn upload(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        body: ByteStream<'_>,
    ) -> ServiceResult<StoredObject> {
        if !Self::accepts_file_name(file_name) {
            return Err(ServiceError::Invalid(format!(
                "`{}` is not a PDF file",
                file_name
            )));
        }

        let key = object_key_for(file_name);
        tracing::Span::current().record("key", key.as_str());
        self.store.upload(&key, content_type, body).await?;
        debug!("object committed");

        Ok(StoredObject {
            bucket_path: self.store.object_uri(&key),
            file_name: file_name.to_string(),
            key,
        })
    }

    /// Insert the row for an uploaded object. `user_id` is generated when the
    /// client did not send one.
    #[instrument(name = "record", skip(self, object), fields(key = %object.key))]
    pub async fn record(&self, object: StoredObject, user_id: Option<Uuid>) -> ServiceResult<Trace> {
        let attributes = match self.store.attributes(&object.key).await {
            Ok(attributes) => attributes,
            Err(err) => {
                self.discard(&object).await;
                return Err(err.into());
            }
        };
        debug!(
            size = attributes.size,
            content_type = attributes.content_type.as_deref().unwrap_or(""),
            "object attributes"
        );

        let inserted = sqlx::query_as::<_, Trace>(&format!(
            "INSERT INTO traces ({cols}) VALUES (?, ?, ?, ?, ?) RETURNING {cols}",
            cols = TRACE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id.unwrap_or_else(Uuid::new_v4))
        .bind(&object.file_name)
        .bind(Utc::now())
        .bind(&object.bucket_path)
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok(trace) => {
                info!(trace_id = %trace.id, bucket_path = %trace.bucket_path, "trace recorded");
                Ok(trace)
            }
            Err(err) => {
                self.discard(&object).await;
                Err(err.into())
            }
        }
    }

    /// Best-effort removal of an object that will never get a row.
    pub async fn discard(&self, object: &StoredObject) {
        match self.store.delete(&object.key).await {
            Ok(()) => debug!(key = %object.key, "discarded unrecorded object"),
            Err(err) => warn!(key = %object.key, "failed to discard unrecorded object: {}", err),
        }
    }

    /// Overwrite the row's fields. Storage is never touched.
    pub async fn update(&self, id: Uuid, input: TraceInput) -> ServiceResult<Trace> {
        sqlx::query_as::<_, Trace>(&format!(
            "UPDATE traces SET user_id = ?, file_name = ?, bucket_path = ? WHERE id = ?
             RETURNING {}",
            TRACE_COLUMNS
        ))
        .bind(input.user_id)
        .bind(&input.file_name)
        .bind(&input.bucket_path)
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ServiceError::NotFound { entity: "trace", id })
    }

    /// Delete the object (logging failures) and then the row.
    #[instrument(name = "delete_trace", skip(self))]
    pub async fn delete(&self, id: Uuid) -> ServiceResult<()> {
        let trace = self.get(id).await?;

        if !trace.bucket_path.is_empty() {
            match key_from_bucket_path(&trace.bucket_path) {
                Some(key) => {
                    if let Err(err) = self.store.delete(key).await {
                        warn!(key, "object delete failed, removing row anyway: {}", err);
                    }
                }
                None => warn!(
                    bucket_path = %trace.bucket_path,
                    "unrecognised bucket path, leaving storage untouched"
                ),
            }
        }

        let result = sqlx::query("DELETE FROM traces WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound { entity: "trace", id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, storage::local::LocalObjectStore};
    use bytes::Bytes;
    use futures::{StreamExt, stream};
    use tempfile::TempDir;

    fn pdf_body() -> ByteStream<'static> {
        stream::iter(vec![
            Ok(Bytes::from_static(b"%PDF-1.4\n")),
            Ok(Bytes::from_static(b"%%EOF\n")),
        ])
        .boxed()
    }

    async fn service() -> (TraceService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "traces").await.unwrap();
        let pool = db::memory_pool().await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        (TraceService::new(pool, Arc::new(store)), dir)
    }

    fn object_file(dir: &TempDir, key: &str) -> std::path::PathBuf {
        dir.path().join("traces").join(key)
    }

    #[test]
    fn only_pdf_names_are_accepted() {
        assert!(TraceService::accepts_file_name("notes.pdf"));
        assert!(TraceService::accepts_file_name("NOTES.PDF"));
        assert!(!TraceService::accepts_file_name("notes.txt"));
        assert!(!TraceService::accepts_file_name("notes.pdf.exe"));
        assert!(!TraceService::accepts_file_name(".pdf"));
    }

    #[tokio::test]
    async fn non_pdf_uploads_store_nothing() {
        let (traces, dir) = service().await;
        let err = traces.upload("notes.txt", None, pdf_body()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));

        let mut entries = std::fs::read_dir(dir.path().join("traces"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name() != ".meta");
        assert!(entries.next().is_none());
    }

    #[tokio::test]
    async fn upload_and_record_generates_user_and_path() {
        let (traces, dir) = service().await;
        let object = traces
            .upload("notes.pdf", Some("application/pdf"), pdf_body())
            .await
            .unwrap();
        assert!(object_file(&dir, &object.key).exists());

        let trace = traces.record(object.clone(), None).await.unwrap();
        assert_eq!(trace.file_name, "notes.pdf");
        assert_eq!(trace.bucket_path, format!("local://traces/{}", object.key));
        assert!(!trace.user_id.is_nil());

        let fetched = traces.get(trace.id).await.unwrap();
        assert_eq!(fetched.bucket_path, trace.bucket_path);
        assert_eq!(fetched.user_id, trace.user_id);
    }

    #[tokio::test]
    async fn explicit_user_id_is_kept() {
        let (traces, _dir) = service().await;
        let user = Uuid::new_v4();
        let object = traces.upload("a.pdf", None, pdf_body()).await.unwrap();
        let trace = traces.record(object, Some(user)).await.unwrap();
        assert_eq!(trace.user_id, user);
    }

    #[tokio::test]
    async fn failed_insert_removes_the_object() {
        let (traces, dir) = service().await;
        let object = traces.upload("a.pdf", None, pdf_body()).await.unwrap();
        let path = object_file(&dir, &object.key);
        assert!(path.exists());

        traces.db.close().await;
        assert!(traces.record(object, None).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_object_at_record_time_writes_no_row() {
        let (traces, dir) = service().await;
        let object = traces.upload("a.pdf", None, pdf_body()).await.unwrap();
        std::fs::remove_file(object_file(&dir, &object.key)).unwrap();

        let err = traces.record(object, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));
        assert!(traces.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_object_records_through_a_task() {
        let (traces, dir) = service().await;
        let object = traces.upload("a.pdf", None, pdf_body()).await.unwrap();
        let key = object.key.clone();
        let pending = PendingObject::new(traces.clone(), object);
        assert_eq!(pending.object().map(|o| o.key.as_str()), Some(key.as_str()));

        let trace = pending.record(None).await.unwrap();
        assert_eq!(traces.get(trace.id).await.unwrap().file_name, "a.pdf");
        assert!(object_file(&dir, &key).exists());
    }

    #[tokio::test]
    async fn dropped_pending_object_is_discarded() {
        let (traces, dir) = service().await;
        let object = traces.upload("a.pdf", None, pdf_body()).await.unwrap();
        let path = object_file(&dir, &object.key);
        drop(PendingObject::new(traces.clone(), object));

        for _ in 0..50 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
        assert!(traces.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_finishes_when_the_caller_is_cancelled() {
        let (traces, _dir) = service().await;
        let object = traces.upload("a.pdf", None, pdf_body()).await.unwrap();
        let pending = PendingObject::new(traces.clone(), object);

        // Drop the caller right after the record task has been spawned.
        let _ = tokio::time::timeout(std::time::Duration::ZERO, pending.record(None)).await;

        let mut rows = 0;
        for _ in 0..50 {
            rows = traces.list().await.unwrap().len();
            if rows == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn delete_tolerates_missing_object() {
        let (traces, dir) = service().await;
        let object = traces.upload("a.pdf", None, pdf_body()).await.unwrap();
        let trace = traces.record(object.clone(), None).await.unwrap();
        std::fs::remove_file(object_file(&dir, &object.key)).unwrap();

        traces.delete(trace.id).await.unwrap();
        assert!(matches!(
            traces.get(trace.id).await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_removes_object_and_row() {
        let (traces, dir) = service().await;
        let object = traces.upload("a.pdf", None, pdf_body()).await.unwrap();
        let trace = traces.record(object.clone(), None).await.unwrap();

        traces.delete(trace.id).await.unwrap();
        assert!(!object_file(&dir, &object.key).exists());
        assert!(matches!(
            traces.delete(trace.id).await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_rewrites_row_only() {
        let (traces, dir) = service().await;
        let object = traces.upload("a.pdf", None, pdf_body()).await.unwrap();
        let trace = traces.record(object.clone(), None).await.unwrap();

        let owner = Uuid::new_v4();
        let updated = traces
            .update(
                trace.id,
                TraceInput {
                    user_id: owner,
                    file_name: "renamed.pdf".into(),
                    bucket_path: trace.bucket_path.clone(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.user_id, owner);
        assert_eq!(updated.file_name, "renamed.pdf");
        assert_eq!(updated.date_created, trace.date_created);
        assert!(object_file(&dir, &object.key).exists());
    }
}
