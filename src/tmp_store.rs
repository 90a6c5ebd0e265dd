//! Scoped registry of temporary files.
//!
//! A `TmpStore` owns a per-run subdirectory of the configured temp
//! directory. Components register file names and receive full paths; every
//! registered file and the subdirectory itself are removed when the store
//! drops, on success and failure alike.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub struct TmpStore {
    dir: PathBuf,
    names: BTreeSet<String>,
}

impl TmpStore {
    /// Create the per-run subdirectory under `tmpdir`.
    pub fn new(tmpdir: &Path) -> io::Result<Self> {
        let dir = tmpdir.join(format!("prism-align-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        log::debug!("temporary files under {}", dir.display());
        Ok(Self {
            dir,
            names: BTreeSet::new(),
        })
    }

    /// Register `name` and return its full path. Registering the same name
    /// again returns the same path.
    pub fn register(&mut self, name: &str) -> PathBuf {
        self.names.insert(name.to_string());
        self.dir.join(name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for TmpStore {
    fn drop(&mut self) {
        for name in &self.names {
            let path = self.dir.join(name);
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    log::warn!("failed to remove {}: {}", path.display(), e);
                }
            }
        }
        if let Err(e) = fs::remove_dir(&self.dir) {
            log::warn!("failed to remove {}: {}", self.dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_register_is_idempotent() {
        let root = TempDir::new().unwrap();
        let mut store = TmpStore::new(root.path()).unwrap();
        let a = store.register("outsam-0");
        let b = store.register("outsam-0");
        assert_eq!(a, b);
    }

    #[test]
    fn test_cleanup_on_drop() {
        let root = TempDir::new().unwrap();
        let dir;
        {
            let mut store = TmpStore::new(root.path()).unwrap();
            dir = store.dir().to_path_buf();
            let p = store.register("outsam-0");
            fs::write(&p, b"data").unwrap();
            assert!(p.exists());
        }
        assert!(!dir.exists());
        // the configured temp root itself is untouched
        assert!(root.path().exists());
    }

    #[test]
    fn test_cleanup_tolerates_unwritten_files() {
        let root = TempDir::new().unwrap();
        {
            let mut store = TmpStore::new(root.path()).unwrap();
            // registered but never created on disk
            store.register("outsam-7");
        }
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
