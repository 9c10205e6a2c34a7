//! Atomic JSON document files.
//!
//! Writes go through a temporary file in the same directory followed by a
//! rename; read-modify-write cycles hold an exclusive `fs2` lock on a
//! sibling `.lock` file so separate processes sharing a pins directory do
//! not lose updates. The lock file goes away with its document.

use civic_core::error::{CivicError, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A handle to one JSON document on disk.
pub struct AtomicJsonFile<T> {
    path: PathBuf,
    _phantom: PhantomData<T>,
}

impl<T> AtomicJsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _phantom: PhantomData,
        }
    }

    /// Loads the document. A missing or empty file is `None`.
    pub fn load(&self) -> Result<Option<T>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Replaces the document atomically.
    pub fn save(&self, data: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(data)?;
        let tmp_path = self.temp_path()?;
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Runs `f` on the current document under an exclusive lock and saves
    /// the result. Returns whatever `f` returns.
    pub fn update<R>(&self, f: impl FnOnce(Option<T>) -> Result<(T, R)>) -> Result<R> {
        let lock = FileLock::acquire(&self.path)?;
        let current = self.load()?;
        let existed = current.is_some();
        match f(current) {
            Ok((data, out)) => {
                self.save(&data)?;
                Ok(out)
            }
            Err(e) => {
                if !existed {
                    lock.discard();
                }
                Err(e)
            }
        }
    }

    /// Writes `data` only if no document exists yet. Returns `false` when one did.
    pub fn create_if_absent(&self, data: &T) -> Result<bool> {
        let _lock = FileLock::acquire(&self.path)?;
        if self.path.exists() {
            return Ok(false);
        }
        self.save(data)?;
        Ok(true)
    }

    /// Removes the document, ignoring a missing file.
    pub fn remove(&self) -> Result<bool> {
        let lock = FileLock::acquire(&self.path)?;
        let removed = match fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        lock.discard();
        Ok(removed)
    }

    fn temp_path(&self) -> Result<PathBuf> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| CivicError::io("Path has no parent directory"))?;
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| CivicError::io("Path has no file name"))?;
        Ok(parent.join(format!(".{}.tmp", file_name.to_string_lossy())))
    }
}

/// Exclusive lock guard, released on drop.
struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self> {
        let lock_path = path.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        loop {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)?;

            #[cfg(unix)]
            {
                use fs2::FileExt;
                file.lock_exclusive()
                    .map_err(|e| CivicError::io(format!("Failed to acquire lock: {}", e)))?;
                // The previous holder unlinked it while we waited
                if !still_linked(&file, &lock_path) {
                    continue;
                }
            }

            return Ok(FileLock {
                file,
                path: lock_path,
            });
        }
    }

    /// Unlinks the lock file, then releases the lock.
    fn discard(self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use fs2::FileExt;
            let _ = self.file.unlock();
        }
    }
}
