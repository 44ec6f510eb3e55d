//! Device-local last-known-good snapshot of the catalog tree.
//!
//! The cache never fails its caller: every error is logged and reads degrade
//! to an empty tree.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracker_core::model::Category;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LocalCacheError {
    #[error("local storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// One opaque, string-keyed persistent slot.
///
/// `set` must replace the value atomically: readers see either the old or the
/// new value, never a mix.
pub trait LocalSlot: Send + Sync {
    /// # Errors
    ///
    /// Returns `LocalCacheError` if the slot cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, LocalCacheError>;

    /// # Errors
    ///
    /// Returns `LocalCacheError` if the slot cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), LocalCacheError>;
}

/// Slot kept in process memory. Can be switched off to simulate a browser
/// with storage disabled.
#[derive(Default)]
pub struct MemorySlot {
    values: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemorySlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), LocalCacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LocalCacheError::Unavailable("storage disabled".into()));
        }
        Ok(())
    }
}

impl LocalSlot for MemorySlot {
    fn get(&self, key: &str) -> Result<Option<String>, LocalCacheError> {
        self.check()?;
        let guard = self
            .values
            .lock()
            .map_err(|e| LocalCacheError::Unavailable(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalCacheError> {
        self.check()?;
        let mut guard = self
            .values
            .lock()
            .map_err(|e| LocalCacheError::Unavailable(e.to_string()))?;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Slot backed by one file per key inside a directory.
///
/// Writes land in a sibling temp file first and are renamed into place.
pub struct FileSlot {
    dir: PathBuf,
}

impl FileSlot {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl LocalSlot for FileSlot {
    fn get(&self, key: &str) -> Result<Option<String>, LocalCacheError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalCacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Typed cache of the full catalog tree over a [`LocalSlot`].
#[derive(Clone)]
pub struct LocalCache {
    slot: Arc<dyn LocalSlot>,
    key: String,
}

impl LocalCache {
    #[must_use]
    pub fn new(slot: Arc<dyn LocalSlot>, key: impl Into<String>) -> Self {
        Self {
            slot,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn in_memory(key: impl Into<String>) -> Self {
        Self::new(Arc::new(MemorySlot::new()), key)
    }

    /// Read the cached tree, propagating failures.
    ///
    /// # Errors
    ///
    /// Returns `LocalCacheError` if the slot is unreadable or holds invalid JSON.
    pub fn try_read(&self) -> Result<Vec<Category>, LocalCacheError> {
        match self.slot.get(&self.key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Read the cached tree. Failures are logged and yield an empty tree.
    #[must_use]
    pub fn read(&self) -> Vec<Category> {
        self.try_read().unwrap_or_else(|err| {
            tracing::warn!(key = %self.key, error = %err, "local cache read failed");
            Vec::new()
        })
    }

    /// Overwrite the cached tree. Failures are logged only.
    pub fn write(&self, categories: &[Category]) {
        let result = serde_json::to_string(categories)
            .map_err(LocalCacheError::from)
            .and_then(|raw| self.slot.set(&self.key, &raw));
        match result {
            Ok(()) => tracing::debug!(
                key = %self.key,
                categories = categories.len(),
                "local cache written"
            ),
            Err(err) => tracing::warn!(key = %self.key, error = %err, "local cache write failed"),
        }
    }
}
