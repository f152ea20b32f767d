//! Represents an account holder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user row.
///
/// The password is only ever stored as a bcrypt hash and is never written back
/// out in responses.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct User {
    /// Unique identifier, generated on create when the client omits it.
    pub id: Uuid,

    pub first_name: String,

    pub last_name: String,

    /// Login name; unique across all users.
    pub username: String,

    /// bcrypt hash of the account password.
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Set once when the row is inserted.
    pub account_created: DateTime<Utc>,

    /// Refreshed on every update.
    pub account_updated: DateTime<Utc>,
}

/// Body accepted by `POST /users` and `PUT /users/{id}`.
#[derive(Deserialize, Clone, Debug)]
pub struct UserInput {
    /// Ignored on update.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub password: String,
}
