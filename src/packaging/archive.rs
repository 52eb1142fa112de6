//! Zip archive creation through the system `zip` tool.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PackageError, Result};

/// Archiver producing one `{hash}.zip` per distinct source.
#[derive(Debug, Clone)]
pub struct ZipArchiver {
    work_dir: PathBuf,
}

impl Default for ZipArchiver {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("stackforge"))
    }
}

impl ZipArchiver {
    /// Creates an archiver writing into `work_dir`.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let work_dir = std::path::absolute(&work_dir).unwrap_or(work_dir);
        Self { work_dir }
    }

    /// Directory archives are written to.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Archives `source` as `{hash}.zip`, reusing an existing archive.
    ///
    /// Directories are archived with their contents at the archive root;
    /// a single file is archived by name.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::ArchiveFailed`] if `zip` cannot run or fails.
    pub async fn build(&self, unit: &str, source: &Path, hash: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let archive = self.work_dir.join(format!("{hash}.zip"));
        if tokio::fs::try_exists(&archive).await.unwrap_or(false) {
            debug!("Reusing archive {}", archive.display());
            return Ok(archive);
        }

        let (cwd, target) = if source.is_dir() {
            (source.to_path_buf(), PathBuf::from("."))
        } else {
            let parent = source.parent().unwrap_or_else(|| Path::new("."));
            let name = source.file_name().map(PathBuf::from).ok_or_else(|| {
                PackageError::ArchiveFailed {
                    unit: unit.to_string(),
                    message: format!("invalid source path {}", source.display()),
                }
            })?;
            (parent.to_path_buf(), name)
        };

        let partial = self
            .work_dir
            .join(format!("{hash}.{}.partial.zip", uuid::Uuid::new_v4()));

        info!("Packaging {unit} from {}", source.display());
        let output = Command::new("zip")
            .args(["-q", "-r", "-X"])
            .arg(&partial)
            .arg(&target)
            .current_dir(&cwd)
            .output()
            .await
            .map_err(|e| PackageError::ArchiveFailed {
                unit: unit.to_string(),
                message: format!("failed to run zip: {e}"),
            })?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(PackageError::ArchiveFailed {
                unit: unit.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        tokio::fs::rename(&partial, &archive).await?;
        debug!("Wrote archive {}", archive.display());
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn zip_available() -> bool {
        std::process::Command::new("zip")
            .arg("-v")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[tokio::test]
    async fn test_build_and_reuse() {
        if !zip_available() {
            return;
        }
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("index.py"), "def handler(e, c): pass").unwrap();
        let work = TempDir::new().unwrap();
        let archiver = ZipArchiver::new(work.path());

        let first = archiver.build("f1", src.path(), "abc").await.unwrap();
        assert!(first.ends_with("abc.zip"));
        assert!(first.exists());

        let second = archiver.build("f1", src.path(), "abc").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_single_file_source() {
        if !zip_available() {
            return;
        }
        let src = TempDir::new().unwrap();
        let file = src.path().join("handler.js");
        std::fs::write(&file, "exports.handler = async () => 1").unwrap();
        let work = TempDir::new().unwrap();

        let archive = ZipArchiver::new(work.path())
            .build("f1", &file, "def")
            .await
            .unwrap();
        assert!(archive.exists());
    }

    #[test]
    fn test_work_dir_is_absolute() {
        let archiver = ZipArchiver::new("relative/dir");
        assert!(archiver.work_dir().is_absolute());
    }
}
