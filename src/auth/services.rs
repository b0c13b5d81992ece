use std::path::Path;

use anyhow::Context;
use axum::{
    extract::{multipart::MultipartError, Multipart},
    http::StatusCode,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::RegisterForm,
        password::{generate_recovery_pin, hash_password_blocking},
        repo_types::{NewUser, StoreError, UniqueField, User},
        validation::ValidRegistration,
    },
    error::{AppError, FieldErrors},
    images::services::{process_profile_picture, ProfilePictureError},
    state::AppState,
    storage::{remove_quietly, TempUpload},
};

/// Multipart name of the avatar file.
pub const PICTURE_FIELD: &str = "profilePicture";

/// Attempts at drawing a recovery PIN whose hash does not collide.
const PIN_ATTEMPTS: usize = 3;

pub struct Registered {
    pub user: User,
    pub recovery_pin: String,
}

fn too_large(max_file_bytes: usize) -> AppError {
    const MIB: usize = 1024 * 1024;
    let limit = if max_file_bytes >= MIB {
        format!("{}MB", max_file_bytes / MIB)
    } else {
        format!("{}KB", max_file_bytes / 1024)
    };
    AppError::PayloadTooLarge(format!("The file is too large. The limit is {limit}."))
}

fn multipart_error(e: MultipartError, max_file_bytes: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(max_file_bytes)
    } else {
        AppError::BadRequest(format!("Error uploading the file: {}", e.body_text()))
    }
}

/// Reads every multipart field. The picture is streamed to a temp file whose guard cleans it
/// up on every exit path, including errors raised while reading later fields.
pub async fn read_registration_form(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<(RegisterForm, Option<TempUpload>), AppError> {
    let max_file_bytes = state.config.uploads.max_file_bytes;
    let mut form = RegisterForm::default();
    let mut picture = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_file_bytes))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == PICTURE_FIELD {
            // Browsers send an empty part when no file was chosen.
            if field.file_name().map_or(true, str::is_empty) {
                continue;
            }
            let mut temp = state.uploads.temp_upload();
            let mut file = tokio::fs::File::create(temp.path())
                .await
                .with_context(|| format!("create temp upload {}", temp.path().display()))?;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| multipart_error(e, max_file_bytes))?
            {
                if temp.record_written(chunk.len()) > max_file_bytes {
                    warn!(limit = max_file_bytes, "profile picture over size limit");
                    return Err(too_large(max_file_bytes));
                }
                file.write_all(&chunk).await.context("write temp upload")?;
            }
            file.flush().await.context("flush temp upload")?;
            debug!(bytes = temp.size(), "profile picture received");
            picture = Some(temp);
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| multipart_error(e, max_file_bytes))?;
        if !form.set(&name, value) {
            debug!(field = %name, "ignoring unknown form field");
        }
    }

    Ok((form, picture))
}

fn conflict(field: UniqueField) -> AppError {
    match field {
        UniqueField::Username => {
            AppError::Conflict(FieldErrors::single("username", "This username already exists."))
        }
        UniqueField::Email => AppError::Conflict(FieldErrors::single(
            "email",
            "This email is already registered.",
        )),
        UniqueField::RecoveryPin => AppError::Server {
            message: "Could not generate unique account data. Please try again.",
            source: anyhow::anyhow!("recovery PIN collided {PIN_ATTEMPTS} times"),
        },
    }
}

/// Removes a half-registered account together with any rendered picture.
async fn discard_user(state: &AppState, user_id: Uuid, picture: &Path) {
    remove_quietly(picture);
    if let Err(e) = state.users.delete(user_id).await {
        error!(user_id = %user_id, error = %e, "could not roll back partial registration");
    }
}

/// Persists the account, then renders the picture at the path keyed by the new id and attaches
/// it. A record whose picture could not be produced or attached is deleted again.
pub async fn register_user(
    state: &AppState,
    reg: ValidRegistration,
    picture: TempUpload,
) -> Result<Registered, AppError> {
    let password_hash = hash_password_blocking(reg.password.clone()).await?;

    let mut created = None;
    for attempt in 1..=PIN_ATTEMPTS {
        let recovery_pin = generate_recovery_pin();
        let new_user = NewUser {
            id: Uuid::new_v4(),
            first_name: reg.first_name.clone(),
            last_name: reg.last_name.clone(),
            username: reg.username.clone(),
            email: reg.email.clone(),
            password_hash: password_hash.clone(),
            recovery_pin_hash: hash_password_blocking(recovery_pin.clone()).await?,
            date_of_birth: reg.date_of_birth,
            accepts_publicity: reg.accepts_publicity,
        };
        match state.users.create(new_user).await {
            Ok(user) => {
                created = Some((user, recovery_pin));
                break;
            }
            Err(StoreError::Duplicate(UniqueField::RecoveryPin)) if attempt < PIN_ATTEMPTS => {
                warn!(attempt, "recovery PIN collision, regenerating");
            }
            Err(StoreError::Duplicate(field)) => {
                warn!(username = %reg.username, ?field, "registration conflict");
                return Err(conflict(field));
            }
            Err(StoreError::Database(e)) => {
                return Err(AppError::Internal(anyhow::Error::new(e).context("create user")))
            }
        }
    }
    let Some((user, recovery_pin)) = created else {
        return Err(conflict(UniqueField::RecoveryPin));
    };

    let dest = state.uploads.profile_picture_file(user.id);
    if let Err(e) = process_profile_picture(picture.path(), &dest).await {
        discard_user(state, user.id, &dest).await;
        return Err(match e {
            ProfilePictureError::Unreadable(source) => {
                warn!(user_id = %user.id, error = %source, "unreadable profile picture");
                AppError::Validation(FieldErrors::single(
                    "profilePicture",
                    "The profile picture must be a PNG, JPEG, GIF or WebP image.",
                ))
            }
            ProfilePictureError::Other(e) => AppError::Internal(e),
        });
    }
    drop(picture);

    let public_path = state.uploads.profile_picture_public_path(user.id);
    if let Err(e) = state.users.set_profile_picture(user.id, &public_path).await {
        discard_user(state, user.id, &dest).await;
        return Err(AppError::Internal(
            anyhow::Error::new(e).context("attach profile picture"),
        ));
    }

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(Registered {
        user: User {
            profile_picture_path: Some(public_path),
            ..user
        },
        recovery_pin,
    })
}
