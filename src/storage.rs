//! Public file store for uploaded images and contract PDFs.
//!
//! Files live under `<public_dir>/uploads` and `<public_dir>/contracts` and are
//! referenced from the database by their path relative to `public_dir`
//! (e.g. `uploads/3f9a…-c1d2….jpg`). The store only ever adds files; removal is
//! limited to best-effort cleanup of files whose database write failed.

use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::errors::AppError;
use crate::forms::UploadedFile;

/// Accepted image extensions.
const IMAGE_FORMATS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

/// Accepted contract extensions.
const CONTRACT_FORMATS: &[&str] = &["pdf"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Contract,
}

impl FileKind {
    pub fn directory(&self) -> &'static str {
        match self {
            FileKind::Image => "uploads",
            FileKind::Contract => "contracts",
        }
    }

    fn formats(&self) -> &'static [&'static str] {
        match self {
            FileKind::Image => IMAGE_FORMATS,
            FileKind::Contract => CONTRACT_FORMATS,
        }
    }
}

/// Calculate SHA256 hash of data
fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Checks size, emptiness and extension; returns the lowercase extension.
pub fn validate_upload(
    kind: FileKind,
    file_name: &str,
    size: usize,
    max_size: usize,
) -> Result<String, AppError> {
    if size == 0 {
        return Err(AppError::BadRequest("Empty file provided".to_string()));
    }

    if size > max_size {
        return Err(AppError::BadRequest(format!(
            "File too large. Maximum size is {} bytes ({}MB)",
            max_size,
            max_size / 1024 / 1024
        )));
    }

    let ext = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or_else(|| {
            AppError::BadRequest(format!("Invalid file extension for: {}", file_name))
        })?;

    if !kind.formats().contains(&ext.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Unsupported file format '{}'. Supported: {}",
            ext,
            kind.formats().join(", ")
        )));
    }

    Ok(ext)
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    max_file_size: usize,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, max_file_size: usize) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for kind in [FileKind::Image, FileKind::Contract] {
            tokio::fs::create_dir_all(self.root.join(kind.directory())).await?;
        }
        Ok(())
    }

    /// Maps a stored relative path onto the filesystem, refusing anything that escapes the root.
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative.trim_start_matches('/'));
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Writes `file` under the directory for `kind` and returns its relative path.
    ///
    /// `stem` names the file; without one a content-hash prefix plus a UUID is used.
    pub async fn save(
        &self,
        kind: FileKind,
        file: &UploadedFile,
        stem: Option<String>,
    ) -> Result<String, AppError> {
        let ext = validate_upload(kind, &file.file_name, file.bytes.len(), self.max_file_size)?;

        let stem = stem.unwrap_or_else(|| {
            let hash = calculate_hash(&file.bytes);
            format!("{}-{}", &hash[..16], Uuid::new_v4().simple())
        });
        let relative = format!("{}/{}.{}", kind.directory(), stem, ext);

        let dir = self.root.join(kind.directory());
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(self.root.join(&relative), &file.bytes).await?;

        tracing::info!(
            "Stored {} '{}' as {} ({} bytes)",
            kind.directory(),
            file.file_name,
            relative,
            file.bytes.len()
        );
        Ok(relative)
    }

    /// Saves several files, removing the ones already written if any fails.
    pub async fn save_all(
        &self,
        kind: FileKind,
        files: &[&UploadedFile],
    ) -> Result<Vec<String>, AppError> {
        let mut saved = Vec::with_capacity(files.len());
        for file in files {
            match self.save(kind, file, None).await {
                Ok(path) => saved.push(path),
                Err(e) => {
                    self.remove_all(&saved).await;
                    return Err(e);
                }
            }
        }
        Ok(saved)
    }

    /// Best-effort delete; failures are logged and ignored.
    pub async fn remove(&self, relative: &str) {
        let Some(path) = self.resolve(relative) else {
            tracing::warn!("Refusing to remove path outside file store: {}", relative);
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::info!("Removed orphaned file {}", relative),
            Err(e) => tracing::warn!("Failed to remove orphaned file {}: {}", relative, e),
        }
    }

    pub async fn remove_all(&self, relatives: &[String]) {
        for relative in relatives {
            self.remove(relative).await;
        }
    }

    pub async fn exists(&self, relative: &str) -> bool {
        match self.resolve(relative) {
            Some(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Returns the path back only if the file is actually present.
    pub async fn existing(&self, relative: Option<&str>) -> Option<String> {
        let relative = relative?;
        if self.exists(relative).await {
            Some(relative.to_string())
        } else {
            tracing::debug!("Stored reference {} has no file; reporting null", relative);
            None
        }
    }
}
