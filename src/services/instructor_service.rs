use super::{ServiceError, ServiceResult, is_unique_violation};
use crate::models::instructor::{Instructor, InstructorInput};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct InstructorService {
    db: SqlitePool,
}

impl InstructorService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> ServiceResult<Vec<Instructor>> {
        let rows = sqlx::query_as::<_, Instructor>(
            "SELECT id, user_id, name, date_created FROM instructors ORDER BY date_created, id",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Instructor> {
        sqlx::query_as::<_, Instructor>(
            "SELECT id, user_id, name, date_created FROM instructors WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ServiceError::NotFound {
            entity: "instructor",
            id,
        })
    }

    pub async fn create(&self, input: InstructorInput) -> ServiceResult<Instructor> {
        let id = input.id.unwrap_or_else(Uuid::new_v4);
        sqlx::query_as::<_, Instructor>(
            "INSERT INTO instructors (id, user_id, name, date_created)
             VALUES (?, ?, ?, ?)
             RETURNING id, user_id, name, date_created",
        )
        .bind(id)
        .bind(input.user_id)
        .bind(&input.name)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ServiceError::Conflict(format!("instructor `{}` already exists", id))
            } else {
                err.into()
            }
        })
    }

    /// Instructors carry no "updated" timestamp; only the owner and name change.
    pub async fn update(&self, id: Uuid, input: InstructorInput) -> ServiceResult<Instructor> {
        sqlx::query_as::<_, Instructor>(
            "UPDATE instructors SET user_id = ?, name = ? WHERE id = ?
             RETURNING id, user_id, name, date_created",
        )
        .bind(input.user_id)
        .bind(&input.name)
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ServiceError::NotFound {
            entity: "instructor",
            id,
        })
    }

    pub async fn delete(&self, id: Uuid) -> ServiceResult<()> {
        let result = sqlx::query("DELETE FROM instructors WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound {
                entity: "instructor",
                id,
            });
        }
        Ok(())
    }
}
