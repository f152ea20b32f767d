//! Users: CRUD plus password hashing.

use super::{ServiceError, ServiceResult, is_unique_violation, violated_column};
use crate::models::user::{User, UserInput};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, first_name, last_name, username, password_hash, account_created, account_updated";

#[derive(Clone)]
pub struct UserService {
    db: SqlitePool,
    hash_cost: u32,
}

impl UserService {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Override the bcrypt cost (tests use the minimum).
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub async fn list(&self) -> ServiceResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users ORDER BY account_created, id",
            USER_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(ServiceError::NotFound { entity: "user", id })
    }

    /// Insert a user, generating the id when absent. A taken username is a
    /// `Conflict`.
    pub async fn create(&self, input: UserInput) -> ServiceResult<User> {
        let id = input.id.unwrap_or_else(Uuid::new_v4);
        let password_hash = hash_password(input.password, self.hash_cost).await?;
        let now = Utc::now();

        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users ({cols}) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {cols}",
            cols = USER_COLUMNS
        ))
        .bind(id)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.username)
        .bind(&password_hash)
        .bind(now)
        .bind(now)
        .fetch_one(&self.db)
        .await
        .map_err(|err| conflict_or(err, &input.username))
    }

    /// Overwrite every mutable field and refresh `account_updated`.
    pub async fn update(&self, id: Uuid, input: UserInput) -> ServiceResult<User> {
        let password_hash = hash_password(input.password, self.hash_cost).await?;

        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET first_name = ?, last_name = ?, username = ?, password_hash = ?,
                    account_updated = ?
             WHERE id = ? RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.username)
        .bind(&password_hash)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|err| conflict_or(err, &input.username))?
        .ok_or(ServiceError::NotFound { entity: "user", id })
    }

    pub async fn delete(&self, id: Uuid) -> ServiceResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound { entity: "user", id });
        }
        Ok(())
    }
}

fn conflict_or(err: sqlx::Error, username: &str) -> ServiceError {
    if !is_unique_violation(&err) {
        return ServiceError::Sqlx(err);
    }
    match violated_column(&err).as_deref() {
        Some("username") => ServiceError::Conflict(format!("username `{}` already exists", username)),
        _ => ServiceError::Conflict("user already exists".into()),
    }
}

/// bcrypt off the async runtime; hashing is deliberately slow.
pub(crate) async fn hash_password(password: String, cost: u32) -> ServiceResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .map_err(|err| ServiceError::Internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn service() -> UserService {
        let pool = db::memory_pool().await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        UserService::new(pool).with_hash_cost(4)
    }

    fn input(username: &str) -> UserInput {
        UserInput {
            id: None,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            username: username.into(),
            password: "hunter2".into(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let users = service().await;
        let created = users.create(input("ada@example.com")).await.unwrap();
        let fetched = users.get(created.id).await.unwrap();

        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.first_name, "Ada");
        assert_eq!(fetched.username, "ada@example.com");
        assert!(bcrypt::verify("hunter2", &fetched.password_hash).unwrap());
        assert_eq!(fetched.account_created, fetched.account_updated);
    }

    #[tokio::test]
    async fn client_supplied_id_is_kept() {
        let users = service().await;
        let id = Uuid::new_v4();
        let created = users
            .create(UserInput {
                id: Some(id),
                ..input("grace@example.com")
            })
            .await
            .unwrap();
        assert_eq!(created.id, id);
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let users = service().await;
        users.create(input("dup@example.com")).await.unwrap();
        let err = users.create(input("dup@example.com")).await.unwrap_err();
        match err {
            ServiceError::Conflict(msg) => assert!(msg.contains("dup@example.com")),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_refreshes_timestamp() {
        let users = service().await;
        let created = users.create(input("old@example.com")).await.unwrap();

        let updated = users
            .update(
                created.id,
                UserInput {
                    first_name: "Augusta".into(),
                    ..input("new@example.com")
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.first_name, "Augusta");
        assert_eq!(updated.username, "new@example.com");
        assert_eq!(updated.account_created, created.account_created);
        assert!(updated.account_updated >= created.account_updated);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let users = service().await;
        let id = Uuid::new_v4();
        assert!(matches!(users.get(id).await, Err(ServiceError::NotFound { .. })));
        assert!(matches!(
            users.update(id, input("x@example.com")).await,
            Err(ServiceError::NotFound { .. })
        ));
        assert!(matches!(users.delete(id).await, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let users = service().await;
        let created = users.create(input("gone@example.com")).await.unwrap();
        users.delete(created.id).await.unwrap();
        assert!(matches!(
            users.get(created.id).await,
            Err(ServiceError::NotFound { .. })
        ));
        assert!(users.list().await.unwrap().is_empty());
    }
}
