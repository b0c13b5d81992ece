use std::path::Path;

use anyhow::Context;
use image::{imageops::FilterType, DynamicImage, ImageFormat, ImageReader};
use tracing::debug;

/// Edge length of the square profile picture.
pub const PROFILE_PICTURE_SIZE: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum ProfilePictureError {
    #[error("uploaded file is not a supported image")]
    Unreadable(#[source] image::ImageError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Center-crops `source` to fill a 500x500 square and writes it to `dest` as WebP.
pub async fn process_profile_picture(source: &Path, dest: &Path) -> Result<(), ProfilePictureError> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || render_profile_picture(&source, &dest))
        .await
        .context("image task panicked")?
}

fn render_profile_picture(source: &Path, dest: &Path) -> Result<(), ProfilePictureError> {
    let img = ImageReader::open(source)
        .with_context(|| format!("open upload {}", source.display()))?
        .with_guessed_format()
        .context("sniff upload format")?
        .decode()
        .map_err(ProfilePictureError::Unreadable)?;

    let (width, height) = (img.width(), img.height());
    let square = img.resize_to_fill(PROFILE_PICTURE_SIZE, PROFILE_PICTURE_SIZE, FilterType::Lanczos3);
    // WebP encoding only takes 8-bit buffers.
    DynamicImage::ImageRgba8(square.to_rgba8())
        .save_with_format(dest, ImageFormat::WebP)
        .with_context(|| format!("write profile picture {}", dest.display()))?;

    debug!(width, height, dest = %dest.display(), "profile picture rendered");
    Ok(())
}
