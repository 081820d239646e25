//! Output directory for cropped images.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_stream::{wrappers::ReadDirStream, StreamExt};

use crate::error::{AppError, Result, ResultExt};

/// Relative URL under which a saved output is served.
pub fn download_url(filename: &str) -> String {
    format!("/api/download/{}", filename)
}

/// A saved output as listed by [`OutputStore::history`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// File name
    pub filename: String,
    /// Size in bytes
    pub size: u64,
    /// Creation time, or modification time where the filesystem has none
    pub created: DateTime<Utc>,
    /// Relative download URL
    pub download_url: String,
}

/// Flat directory of cropped outputs.
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    /// Store outputs in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed.
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating output directory {}", self.dir.display()))
    }

    /// Write an output and return its path.
    pub async fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(filename)?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        log::debug!("saved {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Path of an existing output.
    pub async fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let path = self.path_for(filename)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(AppError::NotFound(format!("file '{}' does not exist", filename))),
        }
    }

    /// All outputs, newest first.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = ReadDirStream::new(dir);
        let mut history = Vec::new();
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    log::warn!("skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let created = meta.created().or_else(|_| meta.modified())?;
            history.push(HistoryEntry {
                download_url: download_url(&filename),
                filename,
                size: meta.len(),
                created: created.into(),
            });
        }

        history.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.filename.cmp(&b.filename)));
        Ok(history)
    }

    fn path_for(&self, filename: &str) -> Result<PathBuf> {
        if !is_safe_filename(filename) {
            return Err(AppError::InvalidInput(format!("invalid file name '{}'", filename)));
        }
        Ok(self.dir.join(filename))
    }
}

/// A bare file name: no separators, no parent references, not hidden.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && !name.contains(['/', '\\', '\0'])
}
