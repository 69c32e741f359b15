//! Persistence of the instance lock record.
//!
//! The lock file at `<app_dir>/.pid` holds two text lines: the serving PID
//! and the control-plane address. Its existence is a hint, never proof of
//! liveness; correctness is established by the liveness probe, so no file
//! locking is used. Writes are atomic (temp file + rename) so a concurrent
//! reader can never observe a partially written record.

use crate::error::{Result, SolusError};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// Name of the lock file inside the application directory.
pub const LOCK_FILE_NAME: &str = ".pid";

/// The persisted (pid, address) pair read back from a lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub pid: u32,
    pub address: Url,
}

/// Reads and writes the lock record for one application directory.
#[derive(Debug, Clone)]
pub struct LockStore {
    app_dir: PathBuf,
    path: PathBuf,
}

impl LockStore {
    /// Create a lock store rooted at `app_dir`.
    pub fn new(app_dir: impl AsRef<Path>) -> Self {
        let app_dir = app_dir.as_ref().to_path_buf();
        let path = app_dir.join(LOCK_FILE_NAME);
        Self { app_dir, path }
    }

    /// Full path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a lock file currently exists (liveness hint only).
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write the lock record, creating the app directory if absent.
    ///
    /// The record is written to a temp file with a PID-unique suffix, synced,
    /// then renamed over the target so readers see either the old record or
    /// the new one, never a truncated file.
    pub fn write(&self, pid: u32, address: &str) -> Result<()> {
        if !self.app_dir.exists() {
            debug!("Creating {}", self.app_dir.display());
            fs::create_dir_all(&self.app_dir).map_err(|e| SolusError::Io {
                message: format!("Failed to create directory {}", self.app_dir.display()),
                path: Some(self.app_dir.clone()),
                source: Some(e),
            })?;
        }

        // `.pid` has no stem to swap, so build the temp name by hand.
        let temp_path = self.app_dir.join(format!(".pid.{pid}.tmp"));
        let contents = format!("{pid}\n{address}");

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| SolusError::Io {
                    message: format!("Failed to create temp file {}", temp_path.display()),
                    path: Some(temp_path.clone()),
                    source: Some(e),
                })?;

            file.write_all(contents.as_bytes())
                .map_err(|e| SolusError::Io {
                    message: format!("Failed to write temp file {}", temp_path.display()),
                    path: Some(temp_path.clone()),
                    source: Some(e),
                })?;

            file.sync_all().map_err(|e| SolusError::Io {
                message: format!("Failed to sync temp file {}", temp_path.display()),
                path: Some(temp_path.clone()),
                source: Some(e),
            })?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| SolusError::Io {
            message: format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                self.path.display()
            ),
            path: Some(self.path.clone()),
            source: Some(e),
        })?;

        debug!("Wrote lock record to {}", self.path.display());
        Ok(())
    }

    /// Read the lock record back.
    ///
    /// Fails with [`SolusError::CorruptLockFile`] if the file is missing, has
    /// the wrong number of lines, or either line fails to parse.
    pub fn read(&self) -> Result<LockRecord> {
        debug!("Reading {}", self.path.display());

        let contents = fs::read_to_string(&self.path).map_err(|e| SolusError::CorruptLockFile {
            path: self.path.clone(),
            message: format!("unreadable: {e}"),
        })?;

        let lines: Vec<&str> = contents.lines().collect();
        if lines.len() != 2 {
            return Err(SolusError::CorruptLockFile {
                path: self.path.clone(),
                message: format!("expected 2 lines, found {}", lines.len()),
            });
        }

        let pid: u32 = lines[0]
            .trim()
            .parse()
            .map_err(|e| SolusError::CorruptLockFile {
                path: self.path.clone(),
                message: format!("bad pid line {:?}: {e}", lines[0]),
            })?;

        let address =
            Url::parse(lines[1].trim()).map_err(|e| SolusError::CorruptLockFile {
                path: self.path.clone(),
                message: format!("bad address line {:?}: {e}", lines[1]),
            })?;

        Ok(LockRecord { pid, address })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path());

        store.write(1234, "http://127.0.0.1:9876").unwrap();

        let record = store.read().unwrap();
        assert_eq!(record.pid, 1234);
        assert_eq!(record.address.port(), Some(9876));
    }

    #[test]
    fn test_write_creates_app_dir() {
        let temp_dir = TempDir::new().unwrap();
        let app_dir = temp_dir.path().join("nested").join("app");
        let store = LockStore::new(&app_dir);

        store.write(1, "http://127.0.0.1:1").unwrap();
        assert!(app_dir.join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_read_missing_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path());

        let err = store.read().unwrap_err();
        assert!(matches!(err, SolusError::CorruptLockFile { .. }));
    }

    #[test]
    fn test_read_wrong_line_count() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path());
        std::fs::write(store.path(), "1234").unwrap();

        let err = store.read().unwrap_err();
        assert!(matches!(err, SolusError::CorruptLockFile { .. }));
    }

    #[test]
    fn test_read_bad_pid() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path());
        std::fs::write(store.path(), "not-a-pid\nhttp://127.0.0.1:1").unwrap();

        let err = store.read().unwrap_err();
        assert!(matches!(err, SolusError::CorruptLockFile { .. }));
    }

    #[test]
    fn test_read_bad_address() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path());
        std::fs::write(store.path(), "1234\n???").unwrap();

        let err = store.read().unwrap_err();
        assert!(matches!(err, SolusError::CorruptLockFile { .. }));
    }

    #[test]
    fn test_overwrite_replaces_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path());

        store.write(1, "http://127.0.0.1:1000").unwrap();
        store.write(2, "http://127.0.0.1:2000").unwrap();

        let record = store.read().unwrap();
        assert_eq!(record.pid, 2);
        assert_eq!(record.address.port(), Some(2000));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let store = LockStore::new(temp_dir.path());

        store.write(42, "http://127.0.0.1:4242").unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }
}
