// src/fs/mod.rs

//! Filesystem abstraction used by the file-backed storage collaborators.
//!
//! [`RealFileSystem`] goes to disk; [`mock::MockFileSystem`] keeps everything
//! in memory so the manifest reader and the lease store can be tested without
//! touching the real filesystem.

use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Write `contents`, creating parent directories as needed.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn is_file(&self, path: &Path) -> bool;

    /// Create `path` only if it does not exist yet.
    ///
    /// Returns `Ok(false)` when the file was already present. This is the
    /// primitive the lease store uses as an exclusive lock.
    fn try_create_new(&self, path: &Path, contents: &[u8]) -> Result<bool>;

    /// Remove a file. Removing a missing file is not an error.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let mut file = fs::File::create(path).with_context(|| format!("creating file {:?}", path))?;
        file.write_all(contents).with_context(|| format!("writing to file {:?}", path))?;
        file.sync_all().with_context(|| format!("syncing file {:?}", path))?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn try_create_new(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                file.write_all(contents)
                    .with_context(|| format!("writing to file {:?}", path))?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e).with_context(|| format!("creating file {:?}", path)),
        }
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing file {:?}", path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).with_context(|| format!("renaming {:?} to {:?}", from, to))
    }
}
