//! Content hashing of unit source trees.
//!
//! The hash depends only on relative file paths and file contents, so two
//! units built from the same folder share one artifact and an unchanged
//! folder maps to an already uploaded key.

use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{PackageError, Result};

/// Hasher for unit source trees.
#[derive(Debug, Default)]
pub struct SourceHasher;

impl SourceHasher {
    /// Creates a new source hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hash of a file or directory tree.
    ///
    /// Entries are visited in file-name order; each file contributes its
    /// path relative to `root`, its length and its bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or a file cannot be read.
    pub fn hash_path(&self, unit: &str, root: &Path) -> Result<String> {
        if !root.exists() {
            return Err(PackageError::SourceNotFound {
                unit: unit.to_string(),
                path: root.to_path_buf(),
            }
            .into());
        }

        let mut hasher = Sha256::new();
        let walker = WalkDir::new(root).follow_links(true).sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|e| archive_error(unit, &e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(root).unwrap_or_else(|_| entry.path());
            let relative = relative.to_string_lossy().replace('\\', "/");
            let contents = std::fs::read(entry.path()).map_err(|e| archive_error(unit, &e))?;

            hasher.update(relative.as_bytes());
            hasher.update([0u8]);
            hasher.update((contents.len() as u64).to_be_bytes());
            hasher.update(&contents);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

fn archive_error(unit: &str, err: &dyn std::fmt::Display) -> crate::error::StackforgeError {
    PackageError::ArchiveFailed {
        unit: unit.to_string(),
        message: err.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, contents) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(full, contents).unwrap();
        }
        dir
    }

    #[test]
    fn test_hash_deterministic() {
        let dir = tree(&[("index.py", "print(1)"), ("lib/util.py", "x = 1")]);
        let hasher = SourceHasher::new();
        assert_eq!(
            hasher.hash_path("f1", dir.path()).unwrap(),
            hasher.hash_path("f2", dir.path()).unwrap()
        );
    }

    #[test]
    fn test_identical_trees_hash_equal() {
        let a = tree(&[("index.py", "print(1)"), ("lib/util.py", "x = 1")]);
        let b = tree(&[("lib/util.py", "x = 1"), ("index.py", "print(1)")]);
        let hasher = SourceHasher::new();
        assert_eq!(
            hasher.hash_path("f1", a.path()).unwrap(),
            hasher.hash_path("f1", b.path()).unwrap()
        );
    }

    #[test]
    fn test_content_change_changes_hash() {
        let a = tree(&[("index.py", "print(1)")]);
        let b = tree(&[("index.py", "print(2)")]);
        let hasher = SourceHasher::new();
        assert_ne!(
            hasher.hash_path("f1", a.path()).unwrap(),
            hasher.hash_path("f1", b.path()).unwrap()
        );
    }

    #[test]
    fn test_rename_changes_hash() {
        let a = tree(&[("index.py", "print(1)")]);
        let b = tree(&[("main.py", "print(1)")]);
        let hasher = SourceHasher::new();
        assert_ne!(
            hasher.hash_path("f1", a.path()).unwrap(),
            hasher.hash_path("f1", b.path()).unwrap()
        );
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = SourceHasher::new()
            .hash_path("f1", &dir.path().join("nope"))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::StackforgeError::Package(PackageError::SourceNotFound { .. })
        ));
    }
}
