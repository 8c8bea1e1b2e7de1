// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir,
}

/// In-memory filesystem.
///
/// Clones share the same tree, so a test can keep one handle and give another
/// to the component under test. [`MockFileSystem::set_failing`] makes every
/// fallible operation return an error, to exercise storage outages.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
    failing: Arc<AtomicBool>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("."), MockEntry::Dir);

        Self {
            files: Arc::new(Mutex::new(files)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let mut files = self.entries();
        insert_file(&mut files, path.as_ref(), content.into());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, MockEntry>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self, path: &Path) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("mock filesystem unavailable: {:?}", path));
        }
        Ok(())
    }
}

fn insert_file(files: &mut HashMap<PathBuf, MockEntry>, path: &Path, content: Vec<u8>) {
    files.insert(path.to_path_buf(), MockEntry::File(content));

    // Parent directories exist implicitly.
    let mut current = path.parent();
    while let Some(parent) = current {
        if parent.as_os_str().is_empty() {
            break;
        }
        files
            .entry(parent.to_path_buf())
            .or_insert(MockEntry::Dir);
        current = parent.parent();
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.check_available(path)?;
        let files = self.entries();
        match files.get(path) {
            Some(MockEntry::File(content)) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.check_available(path)?;
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.entries().contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.entries().get(path), Some(MockEntry::File(_)))
    }

    fn try_create_new(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        self.check_available(path)?;
        let mut files = self.entries();
        if files.contains_key(path) {
            return Ok(false);
        }
        insert_file(&mut files, path, contents.to_vec());
        Ok(true)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.check_available(path)?;
        let mut files = self.entries();
        match files.get(path) {
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            _ => {
                files.remove(path);
                Ok(())
            }
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.check_available(from)?;
        let mut files = self.entries();
        match files.remove(from) {
            Some(MockEntry::File(content)) => {
                insert_file(&mut files, to, content);
                Ok(())
            }
            Some(entry) => {
                files.insert(from.to_path_buf(), entry);
                Err(anyhow!("Not a file: {:?}", from))
            }
            None => Err(anyhow!("File not found: {:?}", from)),
        }
    }
}
