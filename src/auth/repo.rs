use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, StoreError, UniqueField, User, UserCredentials};

const USER_COLUMNS: &str = "id, first_name, last_name, username, email, profile_picture_path, \
     date_of_birth, accepts_publicity, role, created_at, updated_at";

/// Access to user accounts. Uniqueness is enforced by the backing store, never by callers.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;
    /// Match on `username == identifier` or `email == lowercase(identifier)`.
    async fn find_credentials(&self, identifier: &str) -> Result<Option<UserCredentials>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn set_profile_picture(&self, id: Uuid, path: &str) -> Result<(), StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_unique_violation(e: sqlx::Error) -> StoreError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            if let Some(field) = db_err.constraint().and_then(UniqueField::from_constraint) {
                return StoreError::Duplicate(field);
            }
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, first_name, last_name, username, email, password_hash,
                               recovery_pin_hash, date_of_birth, accepts_publicity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.recovery_pin_hash)
            .bind(user.date_of_birth)
            .bind(user.accepts_publicity)
            .fetch_one(&self.db)
            .await
            .map_err(map_unique_violation)
    }

    async fn find_credentials(&self, identifier: &str) -> Result<Option<UserCredentials>, StoreError> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}, password_hash
            FROM users
            WHERE username = $1 OR email = $2
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, UserCredentials>(&sql)
            .bind(identifier)
            .bind(identifier.to_lowercase())
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn set_profile_picture(&self, id: Uuid, path: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET profile_picture_path = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(path)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
