use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, Utc};
use log::debug;
use tokio::{fs, io::AsyncWriteExt};

use crate::errors::CaptureError;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const MAX_NAME_SUFFIX: u32 = 1000;

/// An image published by a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub task_id: String,
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// `{task_id}_{YYYYmmdd_HHMMSS}.png`, stamped with the trigger instant.
pub fn artifact_file_name(task_id: &str, at: &DateTime<Local>) -> String {
    format!("{}_{}.png", task_id, at.format("%Y%m%d_%H%M%S"))
}

pub fn is_png(image: &[u8]) -> bool {
    image.starts_with(PNG_SIGNATURE)
}

/// Writes `image` to a hidden temp file in `dir` and renames it to `file_name`.
///
/// The rename is the publish point: the final name never refers to a partial file.
/// An existing artifact is never replaced; a taken name gets a `_1`, `_2`, ...
/// suffix before the extension.
pub async fn publish(dir: &Path, file_name: &str, image: &[u8]) -> Result<PathBuf, CaptureError> {
    let temp_path = dir.join(format!(".{file_name}.tmp"));

    if let Err(err) = write_synced(&temp_path, image).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(CaptureError::write(&temp_path, err));
    }

    let final_path = match reserve_name(dir, file_name).await {
        Ok(path) => path,
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CaptureError::write(&dir.join(file_name), err));
        }
    };

    if let Err(err) = fs::rename(&temp_path, &final_path).await {
        let _ = fs::remove_file(&temp_path).await;
        let _ = fs::remove_file(&final_path).await;
        return Err(CaptureError::write(&final_path, err));
    }

    debug!("Published {} ({} bytes)", final_path.display(), image.len());
    Ok(final_path)
}

/// Claims the first free name among `file_name`, `{stem}_1.{ext}`, `{stem}_2.{ext}`...
async fn reserve_name(dir: &Path, file_name: &str) -> io::Result<PathBuf> {
    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, extension)) => (stem, Some(extension)),
        None => (file_name, None),
    };

    for suffix in 0..MAX_NAME_SUFFIX {
        let candidate = match (suffix, extension) {
            (0, _) => file_name.to_string(),
            (n, Some(extension)) => format!("{stem}_{n}.{extension}"),
            (n, None) => format!("{stem}_{n}"),
        };
        let path = dir.join(candidate);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => return Ok(path),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free artifact name for {file_name}"),
    ))
}

async fn write_synced(path: &Path, image: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(image).await?;
    file.sync_all().await
}
