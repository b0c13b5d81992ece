use std::sync::Arc;

use crate::auth::repo::{PgUserStore, UserStore};
use crate::auth::session::{PgSessionStore, SessionStore};
use crate::config::AppConfig;
use crate::db;
use crate::rate_limit::RateLimiter;
use crate::storage::UploadStore;

const GLOBAL_LIMIT_MESSAGE: &str =
    "Too many requests were sent; this looks like an attack. Please wait a few minutes.";
const SENSITIVE_LIMIT_MESSAGE: &str =
    "Too many requests to this route, please try again later.";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub uploads: Arc<UploadStore>,
    pub global_limiter: Arc<RateLimiter>,
    pub sensitive_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let pool = db::connect(&config.database_url).await?;
        db::migrate(&pool).await?;

        let state = Self::from_parts(
            config,
            Arc::new(PgUserStore::new(pool.clone())),
            Arc::new(PgSessionStore::new(pool)),
        );
        state.uploads.ensure_dirs().await?;
        Ok(state)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let uploads = Arc::new(UploadStore::new(&config.uploads));
        let global_limiter = Arc::new(RateLimiter::new(
            "global",
            config.global_rate_limit.clone(),
            GLOBAL_LIMIT_MESSAGE,
            config.trust_proxy,
        ));
        let sensitive_limiter = Arc::new(RateLimiter::new(
            "sensitive",
            config.sensitive_rate_limit.clone(),
            SENSITIVE_LIMIT_MESSAGE,
            config.trust_proxy,
        ));
        Self {
            config,
            users,
            sessions,
            uploads,
            global_limiter,
            sensitive_limiter,
        }
    }
}
