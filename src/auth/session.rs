use anyhow::Context;
use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, SameSite};
use rand::{rngs::OsRng, RngCore};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::SessionConfig;

/// Server-side session; the cookie carries only `id`.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub fn issue(user_id: Uuid, ttl: time::Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: new_session_id(),
            user_id,
            created_at: now,
            expires_at: now + ttl,
        }
    }
}

/// 256 random bits, lowercase hex.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, user_id: Uuid, ttl: time::Duration) -> anyhow::Result<Session>;
    /// Returns `None` for unknown or expired sessions.
    async fn load(&self, id: &str) -> anyhow::Result<Option<Session>>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
    async fn delete_expired(&self) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, user_id: Uuid, ttl: time::Duration) -> anyhow::Result<Session> {
        let session = Session::issue(user_id, ttl);
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.db)
        .await
        .context("insert session")?;
        Ok(session)
    }

    async fn load(&self, id: &str) -> anyhow::Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, created_at, expires_at
            FROM sessions
            WHERE id = $1 AND expires_at > now()
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("load session")?;
        Ok(session)
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete session")?;
        Ok(())
    }

    async fn delete_expired(&self) -> anyhow::Result<u64> {
        let done = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
            .execute(&self.db)
            .await
            .context("prune sessions")?;
        Ok(done.rows_affected())
    }
}

pub fn session_cookie(cfg: &SessionConfig, session: &Session) -> Cookie<'static> {
    Cookie::build((cfg.cookie_name.clone(), session.id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(cfg.cookie_secure)
        .max_age(cfg.ttl)
        .build()
}

/// Cookie matching the session cookie's name and path, for `CookieJar::remove`.
pub fn removal_cookie(cfg: &SessionConfig) -> Cookie<'static> {
    Cookie::build((cfg.cookie_name.clone(), "")).path("/").build()
}
