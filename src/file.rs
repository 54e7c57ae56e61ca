use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// A TemporaryFile owns a path on disk and will attempt to delete the file
/// when this handle is dropped.
#[derive(Debug)]
pub struct TemporaryFile {
    path: PathBuf,
}

impl TemporaryFile {
    /// Take ownership of an existing file on disk. When this struct is
    /// dropped, the path provided will be unlinked from the filesystem.
    pub fn new(path: &Path) -> Self {
        TemporaryFile { path: path.to_owned() }
    }

    /// A fresh, not yet existing path in the temp directory ending in
    /// `extension`.
    pub fn reserve(extension: &str) -> Self {
        let name = format!("{}.{}", uuid::Uuid::new_v4().simple(), extension);
        Self::new(&std::env::temp_dir().join(name))
    }

    /// Write `contents` to a new file in the temp directory.
    pub async fn create(extension: &str, contents: impl AsRef<[u8]>) -> Result<Self> {
        let file = Self::reserve(extension);
        tokio::fs::write(&file.path, contents)
            .await
            .with_context(|| format!("failed to write {}", file.path.display()))?;
        Ok(file)
    }

    /// Return the path on the filesystem.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for TemporaryFile {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Drop for TemporaryFile {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tracing::trace!(path = %path.display(), "removing dropped file");
                    let _ = tokio::fs::remove_file(path).await;
                });
            }
            Err(_) => {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
