use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use jiff::Timestamp;
use uuid::Uuid;

use crate::{
    models::store::{CURRENT_VERSION, Store},
    storage::{
        Storage, StorageError,
        migrations::{apply_migrations, detect_version},
    },
};

/// How many previous versions of the store file are kept around.
const DEFAULT_MAX_BACKUPS: usize = 5;

/// Stores the whole [`Store`] as one pretty-printed JSON file.
///
/// Writes go to a uniquely named temp file first and are renamed over the
/// store while holding an exclusive lock on a sibling `.lock` file, so two
/// processes never interleave a save. The previous file is copied into a
/// `backups/` directory next to the store before it is replaced.
pub struct JsonFileStorage {
    path: PathBuf,
    max_backups: usize,
}

impl JsonFileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_dir(&self) -> PathBuf {
        let parent = self.path.parent().unwrap_or(Path::new("."));
        parent.join("backups")
    }

    /// Backup names carry a fixed-width UTC stamp with nanoseconds, so a
    /// plain sort of the directory is chronological.
    fn backup_path(&self, at: Timestamp) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("store");
        let stamp = format!(
            "{}.{:09}",
            at.strftime("%Y%m%dT%H%M%S"),
            at.subsec_nanosecond()
        );
        self.backup_dir().join(format!("{}-{}.json", stem, stamp))
    }

    fn acquire_lock(&self) -> Result<File, StorageError> {
        let lock_path = self.path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StorageError::SaveFailed {
                path: lock_path.clone(),
                source: e,
            })?;
        lock_file
            .lock_exclusive()
            .map_err(|e| StorageError::SaveFailed {
                path: lock_path,
                source: e,
            })?;
        Ok(lock_file)
    }

    fn create_backup(&self) -> Result<(), StorageError> {
        if !self.path.exists() {
            return Ok(());
        }

        let dir = self.backup_dir();
        fs::create_dir_all(&dir).map_err(|e| StorageError::BackupFailed {
            path: dir.clone(),
            source: e,
        })?;

        let backup_path = self.backup_path(Timestamp::now());
        fs::copy(&self.path, &backup_path).map_err(|e| StorageError::BackupFailed {
            path: backup_path,
            source: e,
        })?;
        Ok(())
    }

    fn cleanup_old_backups(&self) -> Result<(), StorageError> {
        let dir = self.backup_dir();
        if !dir.exists() {
            return Ok(());
        }

        let cleanup_err = |e| StorageError::CleanupFailed {
            dir: dir.clone(),
            source: e,
        };

        let mut backups = fs::read_dir(&dir)
            .map_err(cleanup_err)?
            .flatten()
            .filter(|entry| entry.metadata().map(|m| m.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect::<Vec<_>>();

        // Timestamped names sort chronologically.
        backups.sort();

        let excess = backups.len().saturating_sub(self.max_backups);
        for stale in &backups[..excess] {
            fs::remove_file(stale).map_err(cleanup_err)?;
        }

        Ok(())
    }

    /// Moves a fully written temp file over the store under the lock,
    /// backing up the old file first.
    fn replace_with(&self, temp_path: &Path) -> Result<(), StorageError> {
        let lock_file = self.acquire_lock()?;

        self.create_backup()?;
        self.cleanup_old_backups()?;

        fs::rename(temp_path, &self.path).map_err(|e| StorageError::SaveFailed {
            path: self.path.clone(),
            source: e,
        })?;

        FileExt::unlock(&lock_file).map_err(|e| StorageError::SaveFailed {
            path: self.path.clone(),
            source: e,
        })
    }

    fn parse(&self, content: &str) -> Result<Store, StorageError> {
        let mut data: serde_json::Value =
            serde_json::from_str(content).map_err(|e| StorageError::ParseFailed {
                path: self.path.clone(),
                source: e,
            })?;

        let file_version = detect_version(&data).ok_or_else(|| StorageError::MalformedVersion {
            path: self.path.clone(),
        })?;

        if file_version > CURRENT_VERSION {
            return Err(StorageError::FutureVersion(file_version));
        }

        if file_version < CURRENT_VERSION {
            tracing::info!(
                from = file_version,
                to = CURRENT_VERSION,
                path = %self.path.display(),
                "Migrating store"
            );
            data = apply_migrations(data, file_version, CURRENT_VERSION)?;
        }

        serde_json::from_value(data).map_err(|e| StorageError::ParseFailed {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl Storage for JsonFileStorage {
    fn load(&self) -> Result<Store, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => self.parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Store::default()),
            Err(e) => Err(StorageError::LoadFailed {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    fn save(&self, store: &Store) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(store)
            .map_err(|e| StorageError::SerializeFailed { source: e })?;

        let temp_path = PathBuf::from(format!("{}.tmp.{}", self.path.display(), Uuid::new_v4()));
        fs::write(&temp_path, json).map_err(|e| StorageError::SaveFailed {
            path: temp_path.clone(),
            source: e,
        })?;

        if let Err(e) = self.replace_with(&temp_path) {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                tracing::warn!(
                    path = %temp_path.display(),
                    error = %cleanup,
                    "Could not remove temp file"
                );
            }
            return Err(e);
        }

        tracing::debug!(path = %self.path.display(), "Store saved");
        Ok(())
    }
}
