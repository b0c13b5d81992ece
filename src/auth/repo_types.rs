use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Account role stored as the `user_role` Postgres enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    Moderator,
}

/// User record without credentials. Default queries return this shape only.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub profile_picture_path: Option<String>,
    #[serde(with = "iso_date")]
    pub date_of_birth: Date,
    pub accepts_publicity: bool,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// User plus its password hash, only loaded for login.
#[derive(Debug, Clone, FromRow)]
pub struct UserCredentials {
    #[sqlx(flatten)]
    pub user: User,
    pub password_hash: String,
}

/// Insert payload. Hashes are produced before this is built; plaintext never reaches the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub recovery_pin_hash: String,
    pub date_of_birth: Date,
    pub accepts_publicity: bool,
}

/// Column guarded by a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
    RecoveryPin,
}

impl UniqueField {
    pub fn from_constraint(name: &str) -> Option<Self> {
        match name {
            "users_username_key" => Some(Self::Username),
            "users_email_key" => Some(Self::Email),
            "users_recovery_pin_hash_key" => Some(Self::RecoveryPin),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate value for {0:?}")]
    Duplicate(UniqueField),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
