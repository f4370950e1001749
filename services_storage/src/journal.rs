//! File-backed journal: one primary file and one staging file per record
//!
//! Writes go to the staging file, are flushed to stable storage, and are then
//! renamed over the primary. A crash at any point leaves at least one
//! complete, checksummed copy behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::record::{decode_frame, encode_frame, RecordKey, RecordStore, StorageError};

const USER_RECORD_FILE: &str = "device_policies.json";
const OWNERS_RECORD_FILE: &str = "device_owner.json";
const STAGING_SUFFIX: &str = ".tmp";

/// Journal rooted at a base directory
///
/// Layout:
/// - `<base>/device_owner.json` for the owner record
/// - `<base>/users/<n>/device_policies.json` for user `n`
/// - each with a `.tmp` staging sibling
#[derive(Debug, Clone)]
pub struct FileJournal {
    base: PathBuf,
}

impl FileJournal {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Path of the primary file of a record
    pub fn primary_path(&self, key: RecordKey) -> PathBuf {
        match key {
            RecordKey::User(user) => self
                .base
                .join("users")
                .join(user.as_u32().to_string())
                .join(USER_RECORD_FILE),
            RecordKey::Owners => self.base.join(OWNERS_RECORD_FILE),
        }
    }

    /// Path of the staging file of a record
    pub fn staging_path(&self, key: RecordKey) -> PathBuf {
        let primary = self.primary_path(key);
        let mut name = primary.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(STAGING_SUFFIX);
        primary.with_file_name(name)
    }

    fn io_err(key: RecordKey, what: &str, path: &Path, e: io::Error) -> StorageError {
        StorageError::Io {
            key,
            detail: format!("cannot {} {}: {}", what, path.display(), e),
        }
    }

    /// Reads one file; `Ok(None)` when it does not exist
    fn read_file(key: RecordKey, path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(key, "read", path, e)),
        }
    }

    /// Renames the staging copy over the primary one
    ///
    /// The record is in place once the rename succeeds, so a failing
    /// directory sync afterwards is only logged.
    fn promote(
        key: RecordKey,
        staging: &Path,
        primary: &Path,
        dir: &Path,
        sync: impl FnOnce(&Path) -> io::Result<()>,
    ) -> Result<(), StorageError> {
        fs::rename(staging, primary).map_err(|e| Self::io_err(key, "promote", staging, e))?;
        if let Err(e) = sync(dir) {
            warn!(record = %key, dir = %dir.display(), error = %e, "directory sync failed after promote");
        }
        Ok(())
    }

    fn remove_file(key: RecordKey, path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(key, "remove", path, e)),
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

impl RecordStore for FileJournal {
    fn write(&self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError> {
        let primary = self.primary_path(key);
        let staging = self.staging_path(key);
        let dir = primary.parent().unwrap_or(&self.base).to_path_buf();

        fs::create_dir_all(&dir).map_err(|e| Self::io_err(key, "create", &dir, e))?;

        let frame = encode_frame(bytes);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging)
            .map_err(|e| Self::io_err(key, "open", &staging, e))?;
        file.write_all(&frame)
            .map_err(|e| Self::io_err(key, "write", &staging, e))?;
        file.sync_all()
            .map_err(|e| Self::io_err(key, "sync", &staging, e))?;
        drop(file);

        Self::promote(key, &staging, &primary, &dir, sync_dir)?;

        debug!(record = %key, bytes = bytes.len(), "journal record written");
        Ok(())
    }

    fn read(&self, key: RecordKey) -> Result<Vec<u8>, StorageError> {
        let primary = self.primary_path(key);
        let staging = self.staging_path(key);

        let primary_bytes = Self::read_file(key, &primary)?;
        let mut last_problem = None;
        if let Some(bytes) = &primary_bytes {
            match decode_frame(bytes) {
                Ok(payload) => return Ok(payload.to_vec()),
                Err(detail) => {
                    warn!(record = %key, %detail, "primary copy unusable, trying staging");
                    last_problem = Some(detail);
                }
            }
        }

        let staging_bytes = Self::read_file(key, &staging)?;
        if let Some(bytes) = &staging_bytes {
            match decode_frame(bytes) {
                Ok(payload) => {
                    warn!(record = %key, "recovered record from staging copy");
                    return Ok(payload.to_vec());
                }
                Err(detail) => last_problem = Some(detail),
            }
        }

        match last_problem {
            None => Err(StorageError::NotFound { key }),
            Some(detail) => Err(StorageError::Corrupt { key, detail }),
        }
    }

    fn delete(&self, key: RecordKey) -> Result<(), StorageError> {
        Self::remove_file(key, &self.primary_path(key))?;
        Self::remove_file(key, &self.staging_path(key))?;
        debug!(record = %key, "journal record deleted");
        Ok(())
    }
}
