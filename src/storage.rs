use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::UploadConfig;

/// Prefix under which the uploads directory is served.
pub const PUBLIC_PREFIX: &str = "uploads";

/// Local uploads directory plus the scratch directory for incoming files.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    temp_dir: PathBuf,
}

impl UploadStore {
    pub fn new(cfg: &UploadConfig) -> Self {
        Self {
            root: cfg.uploads_dir.clone(),
            temp_dir: cfg.temp_dir.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        for dir in [&self.root, &self.temp_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Reserves a fresh temp path. The returned guard deletes the file when dropped.
    pub fn temp_upload(&self) -> TempUpload {
        TempUpload {
            path: self.temp_dir.join(format!("{}.part", Uuid::new_v4())),
            size: 0,
        }
    }

    /// Filesystem location of a user's processed profile picture.
    pub fn profile_picture_file(&self, user_id: Uuid) -> PathBuf {
        self.root.join(profile_picture_name(user_id))
    }

    /// Path stored on the user record and used by clients, relative to the site root.
    pub fn profile_picture_public_path(&self, user_id: Uuid) -> String {
        format!("{PUBLIC_PREFIX}/{}", profile_picture_name(user_id))
    }
}

fn profile_picture_name(user_id: Uuid) -> String {
    format!("{user_id}.webp")
}

/// Best-effort delete; a file that is already gone is not an error.
pub fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove file"),
    }
}

/// An uploaded file parked in the temp directory for the lifetime of one request.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    size: usize,
}

impl TempUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn record_written(&mut self, bytes: usize) -> usize {
        self.size += bytes;
        self.size
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}
