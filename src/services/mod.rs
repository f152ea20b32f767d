//! Data access and orchestration for the four resources.
//!
//! Each service owns a clone of the SQLite pool and issues single-statement
//! queries; nothing here spans a transaction across tables. The trace service
//! additionally drives the object store.

pub mod course_service;
pub mod instructor_service;
pub mod trace_service;
pub mod user_service;

use crate::storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// True if the database rejected a write because of a UNIQUE constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Name of the column a unique violation was reported on, when SQLite says.
pub(crate) fn violated_column(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .message()
            .rsplit_once('.')
            .map(|(_, column)| column.trim().to_string()),
        _ => None,
    }
}
