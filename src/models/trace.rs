//! Represents an uploaded trace document (PDF) and its stored blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A trace row.
///
/// The payload itself lives in object storage; `bucket_path` is the only
/// pointer to it. An empty `bucket_path` means no blob is attached.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct Trace {
    pub id: Uuid,

    /// Owning user. Generated when the uploader does not supply one.
    pub user_id: Uuid,

    /// Original filename as sent by the client.
    pub file_name: String,

    pub date_created: DateTime<Utc>,

    /// URI of the stored object, e.g. `gs://bucket/<uuid>.pdf`.
    pub bucket_path: String,
}

/// Body accepted by `PUT /traces/{id}`.
#[derive(Deserialize, Clone, Debug)]
pub struct TraceInput {
    pub user_id: Uuid,
    pub file_name: String,
    #[serde(default)]
    pub bucket_path: String,
}
