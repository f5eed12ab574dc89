//! # IO Utilities
//!
//! File system operations for the `.pressroom` runtime directory.
//! Every document the pipeline writes goes through [`write_atomic`] so a crash
//! mid-write never leaves a torn file behind.

use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variable overriding the runtime directory
pub const RUNTIME_PATH_ENV: &str = "PRESSROOM_RUNTIME_PATH";

/// Get the runtime directory path (.pressroom)
pub fn get_runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var(RUNTIME_PATH_ENV) {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".pressroom")
}

/// Ensure a directory exists
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path).await
}

/// Write a file via temp file + rename in the same directory
pub async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).await?;

    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content).await?;
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Write a file that must not exist yet, atomically. Returns `false` and
/// leaves the existing file alone when `path` is already taken.
pub async fn write_new(path: &Path, content: &[u8]) -> std::io::Result<bool> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).await?;

    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content).await?;
    // Linking fails instead of replacing an existing target
    let linked = fs::hard_link(&temp_path, path).await;
    let _ = fs::remove_file(&temp_path).await;
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Check if a file exists
pub async fn file_exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

/// List plain file names in a directory (empty when the directory is missing)
pub async fn list_files(dir: &Path) -> std::io::Result<Vec<String>> {
    if !file_exists(dir).await {
        return Ok(Vec::new());
    }

    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if let Ok(file_type) = entry.file_type().await {
            if file_type.is_file() {
                if let Ok(name) = entry.file_name().into_string() {
                    files.push(name);
                }
            }
        }
    }

    files.sort();
    Ok(files)
}
