//! Represents an instructor profile attached to a user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An instructor row.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct Instructor {
    pub id: Uuid,

    /// Owning user. Not enforced as a foreign key.
    pub user_id: Uuid,

    /// Display name.
    pub name: String,

    pub date_created: DateTime<Utc>,
}

/// Body accepted by `POST /instructors` and `PUT /instructors/{id}`.
#[derive(Deserialize, Clone, Debug)]
pub struct InstructorInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub user_id: Uuid,
    pub name: String,
}
