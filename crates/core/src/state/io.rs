//! # IO Utilities
//!
//! File system helpers for the `.copilot` runtime directory, where the
//! persisted configuration and any table overrides live.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Get the runtime directory path (.copilot)
pub fn get_runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var("COPILOT_RUNTIME_PATH") {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".copilot")
}

/// Resolve a path: absolute paths are kept, relative ones are taken from the
/// runtime directory
pub fn resolve(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        get_runtime_path().join(path)
    }
}

/// Read a file, resolving relative paths against the runtime directory
pub async fn read_file(path: impl AsRef<Path>) -> Result<String> {
    let path = resolve(path);
    fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read file: {:?}", path))
}

/// Write a file to the runtime directory
pub async fn write_runtime_file(relative_path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = resolve(relative_path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write file: {:?}", path))
}

/// Check if a runtime file exists
pub async fn file_exists(path: impl AsRef<Path>) -> bool {
    fs::metadata(resolve(path)).await.is_ok()
}
