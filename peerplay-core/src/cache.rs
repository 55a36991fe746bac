//! Scratch directory management for in-flight stream buffers.
//!
//! Every session gets `<temp_root>/peerflix-<session id>` as on-disk piece
//! storage. The prefix is shared with earlier installations so a purge also
//! reclaims directories left behind by their crashed runs.

use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CacheConfig;
use crate::error::CacheError;

/// Reserved name prefix marking scratch entries owned by this system.
pub const SCRATCH_PREFIX: &str = "peerflix";

/// Process-wide scratch root with orphan reclamation.
#[derive(Debug, Clone)]
pub struct TempCache {
    root: PathBuf,
    prefix: String,
}

impl TempCache {
    /// Creates a cache rooted at `root` using the reserved prefix.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_prefix(root, SCRATCH_PREFIX)
    }

    /// Creates a cache with a custom prefix.
    pub fn with_prefix(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_prefix(config.temp_root.clone(), config.prefix.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the scratch path for a session.
    ///
    /// The directory is not created here; the streaming engine creates it on
    /// first use.
    pub fn allocate(&self, session: impl fmt::Display) -> PathBuf {
        self.root.join(format!("{}-{session}", self.prefix))
    }

    /// Checks whether a temp root entry name carries the reserved prefix.
    pub fn is_reserved(&self, name: &OsStr) -> bool {
        name.to_str()
            .and_then(|name| name.strip_prefix(self.prefix.as_str()))
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Removes every reserved entry under the temp root.
    ///
    /// Best effort: failures are logged and skipped, never returned. Returns
    /// the number of entries removed.
    pub fn purge_orphans(&self) -> usize {
        match self.try_purge() {
            Ok(removed) => {
                if removed > 0 {
                    tracing::debug!(
                        "Purged {} scratch entries under {}",
                        removed,
                        self.root.display()
                    );
                }
                removed
            }
            Err(e) => {
                tracing::warn!("Scratch purge skipped: {e}");
                0
            }
        }
    }

    fn try_purge(&self) -> Result<usize, CacheError> {
        let entries = fs::read_dir(&self.root).map_err(|source| CacheError::ReadRoot {
            path: self.root.clone(),
            source,
        })?;

        let mut removed = 0;
        for entry in entries.flatten() {
            if !self.is_reserved(&entry.file_name()) {
                continue;
            }
            let path = entry.path();
            match remove_entry(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("{e}"),
            }
        }
        Ok(removed)
    }
}

fn remove_entry(path: &Path) -> Result<(), CacheError> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        // Raced with another cleanup.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CacheError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;

    fn entries(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_allocate_uses_reserved_prefix() {
        let cache = TempCache::new("/tmp");
        let path = cache.allocate("3f2a");
        assert_eq!(path, PathBuf::from("/tmp/peerflix-3f2a"));
    }

    #[test]
    fn test_allocate_does_not_create_directory() {
        let root = TempDir::new().unwrap();
        let cache = TempCache::new(root.path());
        let path = cache.allocate("fresh");
        assert!(!path.exists());
    }

    #[test]
    fn test_reserved_name_matching() {
        let cache = TempCache::new("/tmp");
        assert!(cache.is_reserved(OsStr::new("peerflix-abc")));
        assert!(cache.is_reserved(OsStr::new("peerflix-")));
        assert!(!cache.is_reserved(OsStr::new("peerflix")));
        assert!(!cache.is_reserved(OsStr::new("peerflixer")));
        assert!(!cache.is_reserved(OsStr::new("my-peerflix-abc")));
    }

    #[test]
    fn test_purge_removes_reserved_dirs_and_files() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("peerflix-a/nested")).unwrap();
        fs::write(root.path().join("peerflix-a/nested/piece"), b"data").unwrap();
        fs::write(root.path().join("peerflix-b"), b"stray file").unwrap();
        fs::create_dir(root.path().join("unrelated")).unwrap();
        fs::write(root.path().join("notes.txt"), b"keep").unwrap();

        let cache = TempCache::new(root.path());
        assert_eq!(cache.purge_orphans(), 2);
        assert_eq!(entries(root.path()), vec!["notes.txt", "unrelated"]);
    }

    #[test]
    fn test_purge_missing_root_is_swallowed() {
        let root = TempDir::new().unwrap();
        let cache = TempCache::new(root.path().join("does-not-exist"));
        assert_eq!(cache.purge_orphans(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn purge_is_idempotent_and_selective(reserved in 0usize..8, unrelated in 0usize..8) {
            let root = TempDir::new().unwrap();
            for i in 0..reserved {
                fs::create_dir(root.path().join(format!("peerflix-{i}"))).unwrap();
            }
            for i in 0..unrelated {
                fs::create_dir(root.path().join(format!("other-{i}"))).unwrap();
            }

            let cache = TempCache::new(root.path());
            prop_assert_eq!(cache.purge_orphans(), reserved);
            prop_assert_eq!(cache.purge_orphans(), 0);
            prop_assert_eq!(entries(root.path()).len(), unrelated);
        }
    }
}
