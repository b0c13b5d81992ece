//! In-memory stores and request helpers for handler tests.

use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

use crate::{
    app::build_app,
    auth::{
        repo::UserStore,
        repo_types::{NewUser, Role, StoreError, UniqueField, User, UserCredentials},
        session::{Session, SessionStore},
    },
    config::{AppConfig, RateLimitConfig, SessionConfig, UploadConfig},
    state::AppState,
};

pub const SHELL_HTML: &str = "<!doctype html><title>shell</title><main id=\"app-root\"></main>";
pub const MAX_FILE_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user: User,
    pub password_hash: String,
    pub recovery_pin_hash: String,
}

#[derive(Default)]
pub struct MemoryUserStore {
    rows: Mutex<Vec<StoredUser>>,
}

impl MemoryUserStore {
    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn by_username(&self, username: &str) -> Option<StoredUser> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.user.username == username)
            .cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter() {
            if row.user.username == new.username {
                return Err(StoreError::Duplicate(UniqueField::Username));
            }
            if row.user.email == new.email {
                return Err(StoreError::Duplicate(UniqueField::Email));
            }
            if row.recovery_pin_hash == new.recovery_pin_hash {
                return Err(StoreError::Duplicate(UniqueField::RecoveryPin));
            }
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: new.id,
            first_name: new.first_name,
            last_name: new.last_name,
            username: new.username,
            email: new.email,
            profile_picture_path: None,
            date_of_birth: new.date_of_birth,
            accepts_publicity: new.accepts_publicity,
            role: Role::default(),
            created_at: now,
            updated_at: now,
        };
        rows.push(StoredUser {
            user: user.clone(),
            password_hash: new.password_hash,
            recovery_pin_hash: new.recovery_pin_hash,
        });
        Ok(user)
    }

    async fn find_credentials(&self, identifier: &str) -> Result<Option<UserCredentials>, StoreError> {
        let email = identifier.to_lowercase();
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.user.username == identifier || r.user.email == email)
            .map(|r| UserCredentials {
                user: r.user.clone(),
                password_hash: r.password_hash.clone(),
            }))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.user.id == id)
            .map(|r| r.user.clone()))
    }

    async fn set_profile_picture(&self, id: Uuid, path: &str) -> Result<(), StoreError> {
        if let Some(row) = self.rows.lock().unwrap().iter_mut().find(|r| r.user.id == id) {
            row.user.profile_picture_path = Some(path.to_string());
            row.user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.rows.lock().unwrap().retain(|r| r.user.id != id);
        Ok(())
    }
}

/// Wraps a [`MemoryUserStore`] and injects failures: the first `pin_collisions` creates report
/// a recovery PIN clash, and `fail_picture_update` makes attaching the picture fail.
pub struct FaultyUserStore {
    inner: Arc<MemoryUserStore>,
    pin_collisions: AtomicUsize,
    fail_picture_update: bool,
}

impl FaultyUserStore {
    pub fn pin_collisions(inner: Arc<MemoryUserStore>, times: usize) -> Self {
        Self {
            inner,
            pin_collisions: AtomicUsize::new(times),
            fail_picture_update: false,
        }
    }

    pub fn failing_picture_update(inner: Arc<MemoryUserStore>) -> Self {
        Self {
            inner,
            pin_collisions: AtomicUsize::new(0),
            fail_picture_update: true,
        }
    }
}

#[async_trait]
impl UserStore for FaultyUserStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let clash = self
            .pin_collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if clash {
            return Err(StoreError::Duplicate(UniqueField::RecoveryPin));
        }
        self.inner.create(new).await
    }

    async fn find_credentials(&self, identifier: &str) -> Result<Option<UserCredentials>, StoreError> {
        self.inner.find_credentials(identifier).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn set_profile_picture(&self, id: Uuid, path: &str) -> Result<(), StoreError> {
        if self.fail_picture_update {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.set_profile_picture(id, path).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, user_id: Uuid, ttl: time::Duration) -> anyhow::Result<Session> {
        let session = Session::issue(user_id, ttl);
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn load(&self, id: &str) -> anyhow::Result<Option<Session>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(id)
            .filter(|s| s.expires_at > now)
            .cloned())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.sessions.lock().unwrap().remove(id);
        Ok(())
    }

    async fn delete_expired(&self) -> anyhow::Result<u64> {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}

pub fn test_config(root: &Path, max_requests: u32) -> AppConfig {
    let limit = RateLimitConfig {
        window: Duration::from_secs(60),
        max_requests,
    };
    AppConfig {
        database_url: "postgres://unused".into(),
        host: "127.0.0.1".into(),
        port: 0,
        public_dir: root.join("public"),
        uploads: UploadConfig {
            uploads_dir: root.join("uploads"),
            temp_dir: root.join("tmp"),
            max_file_bytes: MAX_FILE_BYTES,
        },
        session: SessionConfig {
            cookie_name: "sid".into(),
            ttl: time::Duration::days(7),
            cookie_secure: false,
        },
        global_rate_limit: limit.clone(),
        sensitive_rate_limit: limit,
        trust_proxy: false,
    }
}

/// Router wired to in-memory stores inside a throwaway directory.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub users: Arc<MemoryUserStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_rate_limit(1_000).await
    }

    pub async fn with_rate_limit(max_requests: u32) -> Self {
        Self::build(max_requests, |users| users).await
    }

    /// Serves requests through the store returned by `wrap`; `users` still sees every row.
    pub async fn with_user_store<S: UserStore + 'static>(
        wrap: impl FnOnce(Arc<MemoryUserStore>) -> Arc<S>,
    ) -> Self {
        Self::build(1_000, wrap).await
    }

    async fn build<S: UserStore + 'static>(
        max_requests: u32,
        wrap: impl FnOnce(Arc<MemoryUserStore>) -> Arc<S>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        std::fs::create_dir_all(public.join("js")).unwrap();
        std::fs::write(public.join("index.html"), SHELL_HTML).unwrap();
        std::fs::write(public.join("js").join("router.js"), "// router").unwrap();

        let users = Arc::new(MemoryUserStore::default());
        let sessions = Arc::new(MemorySessionStore::default());
        let state = AppState::from_parts(
            Arc::new(test_config(dir.path(), max_requests)),
            wrap(users.clone()),
            sessions.clone(),
        );
        state.uploads.ensure_dirs().await.unwrap();

        Self {
            router: build_app(state.clone()),
            state,
            users,
            sessions,
            dir,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.dir.path().join("tmp")
    }

    pub fn temp_files(&self) -> usize {
        std::fs::read_dir(self.temp_dir()).unwrap().count()
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }
}

pub async fn body_string(res: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(res: Response<Body>) -> (StatusCode, serde_json::Value) {
    let status = res.status();
    let body = body_string(res).await;
    (status, serde_json::from_str(&body).unwrap())
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([30, 120, 200]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

const BOUNDARY: &str = "----blogsite-test-boundary";

pub fn multipart_request(fields: &[(&str, &str)], picture: Option<&[u8]>) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(bytes) = picture {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"profilePicture\"; filename=\"me.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/register")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn registration_fields<'a>(username: &'a str, email: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("firstName", "Lucía"),
        ("lastName", "García López"),
        ("username", username),
        ("email", email),
        ("confirmEmail", email),
        ("password", "hunter22"),
        ("confirmPassword", "hunter22"),
        ("dateOfBirth", "1991-06-15"),
        ("acceptsPublicity", "on"),
    ]
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// `name=value` part of the first `set-cookie` header.
pub fn session_cookie_pair(res: &Response<Body>) -> Option<String> {
    let raw = res.headers().get(header::SET_COOKIE)?.to_str().ok()?;
    raw.split(';').next().map(str::to_string)
}
