use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use tracing::error;

/// Bytes of entropy in a recovery PIN; rendered as twice as many hex digits.
const RECOVERY_PIN_BYTES: usize = 5;

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Hashing is CPU bound; keep it off the async workers.
pub async fn hash_password_blocking(plain: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .context("hash task panicked")?
}

pub async fn verify_password_blocking(plain: String, hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await
        .context("verify task panicked")?
}

lazy_static! {
    static ref DUMMY_HASH: Option<String> = hash_password("no-such-account").ok();
}

/// Burns one verification so unknown identifiers cost as much as wrong passwords.
pub async fn verify_against_dummy(plain: String) {
    let Some(hash) = DUMMY_HASH.clone() else {
        return;
    };
    let _ = verify_password_blocking(plain, hash).await;
}

/// Uppercase hex recovery PIN, e.g. `3FA09C11D2`.
pub fn generate_recovery_pin() -> String {
    let mut bytes = [0u8; RECOVERY_PIN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}
