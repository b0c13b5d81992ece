use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

/// Resolves the session cookie to the signed-in user's id.
pub struct SessionUser {
    pub user_id: Uuid,
    pub session_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let session_id = jar
            .get(&state.config.session.cookie_name)
            .map(|c| c.value().to_string())
            .ok_or(AppError::Unauthenticated)?;

        let session = state.sessions.load(&session_id).await?.ok_or_else(|| {
            warn!("unknown or expired session");
            AppError::Unauthenticated
        })?;

        Ok(SessionUser {
            user_id: session.user_id,
            session_id: session.id,
        })
    }
}
