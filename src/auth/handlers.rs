use anyhow::Context;
use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        State,
    },
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    app::spa_shell,
    auth::{
        dto::{LoginRequest, MessageResponse, RegisterResponse},
        extractors::SessionUser,
        password::{verify_against_dummy, verify_password_blocking},
        repo_types::User,
        services::{read_registration_form, register_user},
        session::{removal_cookie, session_cookie},
        validation::{validate_login, validate_registration},
    },
    error::{AppError, FieldErrors},
    rate_limit,
    state::AppState,
};

const REGISTERED_MESSAGE: &str = "User registered successfully! IMPORTANT: this is your recovery PIN. \
     Write it down somewhere safe; you will need it to recover your account.";

/// Form actions answer POST; a GET on the same path is a page load and gets the SPA shell.
pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let shell = spa_shell(&state.config.public_dir);
    let global = middleware::from_fn_with_state(state.global_limiter.clone(), rate_limit::enforce);
    let sensitive =
        middleware::from_fn_with_state(state.sensitive_limiter.clone(), rate_limit::enforce);
    let body_limit = DefaultBodyLimit::max(state.config.uploads.max_body_bytes());

    Router::new()
        .route(
            "/login",
            post(login)
                .layer(sensitive.clone())
                .layer(global.clone())
                .get_service(shell.clone()),
        )
        .route(
            "/register",
            post(register)
                .layer(body_limit)
                .layer(sensitive)
                .layer(global.clone())
                .get_service(shell.clone()),
        )
        .route(
            "/logout",
            post(logout).layer(global.clone()).get_service(shell),
        )
        .route("/me", get(me).layer(global))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (identifier, password) = validate_login(&payload).map_err(AppError::Validation)?;

    let credentials = state
        .users
        .find_credentials(identifier)
        .await
        .context("look up login identifier")?;

    let Some(credentials) = credentials else {
        verify_against_dummy(password.to_string()).await;
        warn!(identifier = %identifier, "login unknown identifier");
        return Err(AppError::InvalidCredentials);
    };

    let ok = verify_password_blocking(password.to_string(), credentials.password_hash).await?;
    if !ok {
        warn!(user_id = %credentials.user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    let cfg = &state.config.session;
    if let Some(previous) = jar.get(&cfg.cookie_name) {
        if let Err(e) = state.sessions.delete(previous.value()).await {
            error!(error = %e, "could not drop previous session");
        }
    }
    let session = state
        .sessions
        .create(credentials.user.id, cfg.ttl)
        .await?;

    info!(user_id = %credentials.user.id, "user logged in");
    Ok((
        jar.add(session_cookie(cfg, &session)),
        Json(MessageResponse::new("Logged in successfully.")),
    ))
}

#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (form, picture) = read_registration_form(&state, &mut multipart).await?;

    let today = OffsetDateTime::now_utc().date();
    let reg = validate_registration(&form, picture.is_some(), today).map_err(|errors| {
        debug!(?errors, "registration rejected");
        AppError::Validation(errors)
    })?;
    let picture = picture.ok_or_else(|| {
        AppError::Validation(FieldErrors::single("general", "Some required fields are missing."))
    })?;

    let registered = register_user(&state, reg, picture).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: REGISTERED_MESSAGE.to_string(),
            user_id: registered.user.id,
            recovery_pin: registered.recovery_pin,
        }),
    ))
}

#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    let cfg = &state.config.session;
    if let Some(cookie) = jar.get(&cfg.cookie_name) {
        state
            .sessions
            .delete(cookie.value())
            .await
            .map_err(|source| AppError::Server {
                message: "Could not close the session.",
                source,
            })?;
        info!("session closed");
    }
    Ok((
        jar.remove(removal_cookie(cfg)),
        Json(MessageResponse::new("Session closed successfully.")),
    ))
}

#[instrument(skip(state, session), fields(user_id = %session.user_id))]
pub async fn me(
    State(state): State<AppState>,
    session: SessionUser,
) -> Result<Json<User>, AppError> {
    let user = state
        .users
        .find_by_id(session.user_id)
        .await
        .context("load session user")?
        .ok_or_else(|| {
            warn!(session_id = %session.session_id, "session points at a missing user");
            AppError::Unauthenticated
        })?;
    Ok(Json(user))
}
