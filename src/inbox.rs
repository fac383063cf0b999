//! The input directory of pending label images, and the archive that
//! processed images move to.

use chrono::Local;
use tokio::fs;

use crate::prelude::*;

/// Image subtypes we know how to decode.
const SUPPORTED_IMAGE_SUBTYPES: &[&str] = &["png", "jpeg", "bmp", "gif", "tiff"];

/// Does this path look like an image we can process?
pub fn is_supported_image(path: &Path) -> bool {
    mime_guess::from_path(path).iter().any(|mime| {
        mime.type_() == mime_guess::mime::IMAGE
            && SUPPORTED_IMAGE_SUBTYPES.contains(&mime.subtype().as_str())
    })
}

/// List images waiting in `input_dir`, sorted by path.
///
/// A missing directory just means there is nothing to do.
#[instrument(level = "debug", skip_all, fields(dir = %input_dir.display()))]
pub async fn pending_images(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(input_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("Input directory does not exist");
            return Ok(vec![]);
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("cannot list input directory {:?}", input_dir));
        }
    };

    let mut images = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("cannot list input directory {:?}", input_dir))?
    {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && is_supported_image(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Move a processed image into `archive_dir`, returning its new path.
///
/// Existing files are never overwritten: on a name clash we append a
/// timestamp (and a counter, if even that is taken).
#[instrument(level = "debug", skip_all, fields(path = %image_path.display()))]
pub async fn archive_image(image_path: &Path, archive_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(archive_dir)
        .await
        .with_context(|| format!("cannot create archive directory {:?}", archive_dir))?;
    let file_name = image_path
        .file_name()
        .ok_or_else(|| anyhow!("{:?} has no file name", image_path))?;

    let mut dest = archive_dir.join(file_name);
    if fs::try_exists(&dest).await.unwrap_or(false) {
        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = image_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let timestamp = Local::now().format("%Y%m%d%H%M%S");
        dest = archive_dir.join(format!("{stem}_{timestamp}{ext}"));
        let mut counter = 1;
        while fs::try_exists(&dest).await.unwrap_or(false) {
            dest = archive_dir.join(format!("{stem}_{timestamp}_{counter}{ext}"));
            counter += 1;
        }
    }

    if let Err(err) = fs::rename(image_path, &dest).await {
        // `rename` can't cross filesystems, so fall back to copying.
        debug!("rename failed ({}), copying instead", err);
        fs::copy(image_path, &dest)
            .await
            .with_context(|| format!("cannot copy {:?} to {:?}", image_path, dest))?;
        fs::remove_file(image_path)
            .await
            .with_context(|| format!("cannot remove {:?} after copying", image_path))?;
    }
    Ok(dest)
}
