use std::path::PathBuf;

use thiserror::Error;

use crate::models::store::Store;

pub mod json;
pub mod migrations;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to load store from '{path}': {source}")]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON from '{path}': {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store file '{path}' has a malformed version field")]
    MalformedVersion { path: PathBuf },

    #[error("Failed to save store to '{path}': {source}")]
    SaveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize store to JSON: {source}")]
    SerializeFailed {
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to create backup at '{path}': {source}")]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to cleanup old backups in '{dir}': {source}")]
    CleanupFailed {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migrating store from version {from} failed: {reason}")]
    MigrationFailed { from: u32, reason: String },

    #[error(
        "Store file was created by a newer version of studiodesk (version {0}). Please upgrade to open this file."
    )]
    FutureVersion(u32),

    #[error("Store file has unsupported version {0}. This version of studiodesk cannot read this file.")]
    UnsupportedVersion(u32),
}

/// Local persistence for the [`Store`] document.
pub trait Storage {
    fn load(&self) -> Result<Store, StorageError>;
    fn save(&self, store: &Store) -> Result<(), StorageError>;

    /// Saves `store`. If that fails, `store` is put back to `previous` so
    /// memory never runs ahead of what is on disk.
    fn save_or_restore(&self, store: &mut Store, previous: Store) -> Result<(), StorageError> {
        if let Err(e) = self.save(store) {
            tracing::warn!(error = %e, "Save failed, rolling back in-memory changes");
            *store = previous;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod memory {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use super::{Storage, StorageError};
    use crate::models::store::Store;

    /// Keeps the serialized store in memory so `load` hands back a fresh
    /// copy, the same way the file backend does.
    #[derive(Default)]
    pub struct MemoryStorage {
        saved: Mutex<Option<String>>,
        read_only: AtomicBool,
    }

    impl MemoryStorage {
        /// Makes every following `save` fail like a full disk would.
        pub fn fail_saves(&self) {
            self.read_only.store(true, Ordering::SeqCst);
        }

        /// Raw JSON of the last save, if any.
        pub fn snapshot(&self) -> Option<String> {
            self.saved.lock().unwrap().clone()
        }
    }

    impl Storage for MemoryStorage {
        fn load(&self) -> Result<Store, StorageError> {
            match self.saved.lock().unwrap().as_deref() {
                Some(json) => serde_json::from_str(json).map_err(|e| StorageError::ParseFailed {
                    path: "<memory>".into(),
                    source: e,
                }),
                None => Ok(Store::default()),
            }
        }

        fn save(&self, store: &Store) -> Result<(), StorageError> {
            if self.read_only.load(Ordering::SeqCst) {
                return Err(StorageError::SaveFailed {
                    path: "<memory>".into(),
                    source: std::io::Error::other("read-only"),
                });
            }
            let json = serde_json::to_string(store)
                .map_err(|e| StorageError::SerializeFailed { source: e })?;
            *self.saved.lock().unwrap() = Some(json);
            Ok(())
        }
    }
}
