use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl: time::Duration,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub uploads_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Per-file limit for `profilePicture`.
    pub max_file_bytes: usize,
}

impl UploadConfig {
    /// Request body limit for multipart registration: the file plus room for the text fields.
    pub fn max_body_bytes(&self) -> usize {
        self.max_file_bytes + 64 * 1024
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub public_dir: PathBuf,
    pub uploads: UploadConfig,
    pub session: SessionConfig,
    pub global_rate_limit: RateLimitConfig,
    pub sensitive_rate_limit: RateLimitConfig,
    /// Take the client address from `x-forwarded-for` instead of the socket peer.
    pub trust_proxy: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let uploads = UploadConfig {
            uploads_dir: env_or("UPLOADS_DIR", PathBuf::from("uploads")),
            temp_dir: env_or(
                "UPLOAD_TMP_DIR",
                std::env::temp_dir().join("blogsite-uploads"),
            ),
            max_file_bytes: env_or("UPLOAD_MAX_BYTES", 2 * 1024 * 1024),
        };
        let session = SessionConfig {
            cookie_name: env_or("SESSION_COOKIE_NAME", "sid".to_string()),
            ttl: time::Duration::days(env_or("SESSION_TTL_DAYS", 7)),
            cookie_secure: env_or("COOKIE_SECURE", false),
        };
        let global_rate_limit = RateLimitConfig {
            window: Duration::from_secs(env_or("RATE_LIMIT_WINDOW_SECS", 15 * 60)),
            max_requests: env_or("RATE_LIMIT_MAX", 200),
        };
        let sensitive_rate_limit = RateLimitConfig {
            window: Duration::from_secs(env_or("SENSITIVE_RATE_LIMIT_WINDOW_SECS", 5 * 60)),
            max_requests: env_or("SENSITIVE_RATE_LIMIT_MAX", 10),
        };
        Ok(Self {
            database_url,
            host: env_or("APP_HOST", "0.0.0.0".to_string()),
            port: env_or("APP_PORT", 5000),
            public_dir: env_or("PUBLIC_DIR", PathBuf::from("public")),
            uploads,
            session,
            global_rate_limit,
            sensitive_rate_limit,
            trust_proxy: env_or("TRUST_PROXY", false),
        })
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
