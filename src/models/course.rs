//! Represents a course offering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A course row.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct Course {
    pub id: Uuid,

    /// Catalogue code, e.g. "CS-101".
    pub code: String,

    pub name: String,

    pub description: String,

    /// Term within the academic year ("fall", "spring", ...).
    pub semester_term: String,

    pub manufacturer: String,

    pub credit_hours: i32,

    pub semester_year: i32,

    pub date_added: DateTime<Utc>,

    pub date_last_updated: DateTime<Utc>,

    /// User that created / owns the course.
    pub owner_user_id: Uuid,

    pub instructor_id: Uuid,
}

/// Body accepted by `POST /courses` and `PUT /courses/{id}`.
#[derive(Deserialize, Clone, Debug)]
pub struct CourseInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub semester_term: String,
    #[serde(default)]
    pub manufacturer: String,
    pub credit_hours: i32,
    pub semester_year: i32,
    pub owner_user_id: Uuid,
    pub instructor_id: Uuid,
}
