//! Local byte storage addressed by filename.
//!
//! [`FsStore`] keeps files flat under a cache root injected at construction.
//! [`MemoryStore`] is an in-memory stand-in used by tests.

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

/// Suffix of files being written. They only become visible under their real
/// name once complete.
const PARTIAL_SUFFIX: &str = ".part";

#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Whether a complete file named `filename` is stored.
    async fn exists(&self, filename: &str) -> Result<bool, StoreError>;

    /// Store `bytes` under `filename`, replacing any previous file.
    async fn write(&self, filename: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Delete a file. Deleting a file that does not exist succeeds.
    async fn delete(&self, filename: &str) -> Result<(), StoreError>;

    /// Names of all stored files.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Path a surface can open to read the file.
    fn locate(&self, filename: &str) -> PathBuf;
}

fn check_name(filename: &str) -> Result<(), StoreError> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\'])
    {
        return Err(StoreError::InvalidName(filename.to_string()));
    }
    Ok(())
}

/// Flat directory of cached files.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        tracing::info!("Asset cache at {}", root.display());
        Ok(Self { root })
    }
}

#[async_trait]
impl LocalStore for FsStore {
    async fn exists(&self, filename: &str) -> Result<bool, StoreError> {
        check_name(filename)?;
        let path = self.root.join(filename);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    async fn write(&self, filename: &str, bytes: &[u8]) -> Result<(), StoreError> {
        check_name(filename)?;
        let path = self.root.join(filename);
        let partial = self.root.join(format!("{}{}", filename, PARTIAL_SUFFIX));

        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| StoreError::io(&partial, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StoreError::io(&partial, e))?;
        file.flush().await.map_err(|e| StoreError::io(&partial, e))?;
        drop(file);

        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        tracing::debug!(
            "Stored {} ({:.2} KB)",
            filename,
            bytes.len() as f64 / 1024.0
        );
        Ok(())
    }

    async fn delete(&self, filename: &str) -> Result<(), StoreError> {
        check_name(filename)?;
        let path = self.root.join(filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| e.file_name().to_str().map(str::to_owned))
                .collect()
        })
        .await
        .map_err(|e| StoreError::Scan(e.to_string()))
    }

    fn locate(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }
}

/// In-memory store with operation counters.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    locked: Mutex<HashSet<String>>,
    writes: Mutex<usize>,
    deletes: Mutex<usize>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with files.
    pub fn with_files<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        {
            let mut files = store.files.lock().unwrap_or_else(|e| e.into_inner());
            for name in names {
                files.insert(name.into(), Vec::new());
            }
        }
        store
    }

    /// Make deletes of `filename` fail, like a file held open by a player.
    pub fn lock_file(&self, filename: &str) {
        self.locked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(filename.to_string());
    }

    /// Stored names, sorted.
    pub fn filenames(&self) -> Vec<String> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn contents(&self, filename: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(filename)
            .cloned()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn delete_count(&self) -> usize {
        *self.deletes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn exists(&self, filename: &str) -> Result<bool, StoreError> {
        check_name(filename)?;
        Ok(self
            .files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(filename))
    }

    async fn write(&self, filename: &str, bytes: &[u8]) -> Result<(), StoreError> {
        check_name(filename)?;
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(filename.to_string(), bytes.to_vec());
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    async fn delete(&self, filename: &str) -> Result<(), StoreError> {
        check_name(filename)?;
        if self
            .locked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(filename)
        {
            return Err(StoreError::io(
                self.locate(filename),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "file is locked"),
            ));
        }
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(filename);
        *self.deletes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.filenames())
    }

    fn locate(&self, filename: &str) -> PathBuf {
        Path::new("/memory").join(filename)
    }
}
