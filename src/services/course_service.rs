use super::{ServiceError, ServiceResult, is_unique_violation};
use crate::models::course::{Course, CourseInput};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

const COURSE_COLUMNS: &str = "id, code, name, description, semester_term, manufacturer, \
     credit_hours, semester_year, date_added, date_last_updated, owner_user_id, instructor_id";

#[derive(Clone)]
pub struct CourseService {
    db: SqlitePool,
}

impl CourseService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> ServiceResult<Vec<Course>> {
        let rows = sqlx::query_as::<_, Course>(&format!(
            "SELECT {} FROM courses ORDER BY date_added, id",
            COURSE_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Course> {
        sqlx::query_as::<_, Course>(&format!(
            "SELECT {} FROM courses WHERE id = ?",
            COURSE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ServiceError::NotFound { entity: "course", id })
    }

    pub async fn create(&self, input: CourseInput) -> ServiceResult<Course> {
        let id = input.id.unwrap_or_else(Uuid::new_v4);
        let now = Utc::now();

        sqlx::query_as::<_, Course>(&format!(
            "INSERT INTO courses ({cols}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {cols}",
            cols = COURSE_COLUMNS
        ))
        .bind(id)
        .bind(&input.code)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.semester_term)
        .bind(&input.manufacturer)
        .bind(input.credit_hours)
        .bind(input.semester_year)
        .bind(now)
        .bind(now)
        .bind(input.owner_user_id)
        .bind(input.instructor_id)
        .fetch_one(&self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ServiceError::Conflict(format!("course `{}` already exists", id))
            } else {
                err.into()
            }
        })
    }

    /// Full overwrite of the mutable fields; `date_last_updated` is refreshed.
    pub async fn update(&self, id: Uuid, input: CourseInput) -> ServiceResult<Course> {
        sqlx::query_as::<_, Course>(&format!(
            "UPDATE courses
             SET code = ?, name = ?, description = ?, semester_term = ?, manufacturer = ?,
                 credit_hours = ?, semester_year = ?, date_last_updated = ?,
                 owner_user_id = ?, instructor_id = ?
             WHERE id = ?
             RETURNING {}",
            COURSE_COLUMNS
        ))
        .bind(&input.code)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.semester_term)
        .bind(&input.manufacturer)
        .bind(input.credit_hours)
        .bind(input.semester_year)
        .bind(Utc::now())
        .bind(input.owner_user_id)
        .bind(input.instructor_id)
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ServiceError::NotFound { entity: "course", id })
    }

    pub async fn delete(&self, id: Uuid) -> ServiceResult<()> {
        let result = sqlx::query("DELETE FROM courses WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound { entity: "course", id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn service() -> CourseService {
        let pool = db::memory_pool().await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        CourseService::new(pool)
    }

    fn input(code: &str) -> CourseInput {
        CourseInput {
            id: None,
            code: code.into(),
            name: "Operating Systems".into(),
            description: String::new(),
            semester_term: "fall".into(),
            manufacturer: String::new(),
            credit_hours: 4,
            semester_year: 2025,
            owner_user_id: Uuid::new_v4(),
            instructor_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn create_matches_input() {
        let courses = service().await;
        let sent = input("CS-350");
        let created = courses.create(sent.clone()).await.unwrap();
        let fetched = courses.get(created.id).await.unwrap();

        assert_eq!(fetched.code, "CS-350");
        assert_eq!(fetched.credit_hours, 4);
        assert_eq!(fetched.semester_year, 2025);
        assert_eq!(fetched.owner_user_id, sent.owner_user_id);
        assert_eq!(fetched.instructor_id, sent.instructor_id);
        assert_eq!(fetched.date_added, fetched.date_last_updated);
    }

    #[tokio::test]
    async fn update_overwrites_and_refreshes() {
        let courses = service().await;
        let created = courses.create(input("CS-350")).await.unwrap();

        let updated = courses
            .update(
                created.id,
                CourseInput {
                    credit_hours: 3,
                    description: "Processes and memory".into(),
                    ..input("CS-351")
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.code, "CS-351");
        assert_eq!(updated.credit_hours, 3);
        assert_eq!(updated.description, "Processes and memory");
        assert_eq!(updated.date_added, created.date_added);
        assert!(updated.date_last_updated >= created.date_last_updated);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let courses = service().await;
        let created = courses.create(input("CS-101")).await.unwrap();
        courses.delete(created.id).await.unwrap();
        assert!(matches!(
            courses.get(created.id).await,
            Err(ServiceError::NotFound { .. })
        ));
        assert!(matches!(
            courses.delete(created.id).await,
            Err(ServiceError::NotFound { .. })
        ));
    }
}
