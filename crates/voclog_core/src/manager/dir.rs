//! WAL directory layout.
//!
//! ```text
//! <wal_dir>/
//! ├─ LOCK                 # Advisory lock, one manager per directory
//! ├─ SHUTDOWN             # Ticks and ids saved at the last clean stop
//! ├─ logfile-<id>.db      # Logfiles
//! └─ temp-<id>.db         # Logfile being created, renamed when complete
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::FileId;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const LOCK_FILE: &str = "LOCK";
const SHUTDOWN_FILE: &str = "SHUTDOWN";
const LOGFILE_PREFIX: &str = "logfile-";
const TEMP_PREFIX: &str = "temp-";
const SUFFIX: &str = ".db";

/// An exclusively locked WAL directory.
#[derive(Debug)]
pub struct WalDir {
    path: PathBuf,
    /// Held for exclusive access; released on drop.
    _lock_file: File,
}

impl WalDir {
    /// Opens `path`, creating it if needed, and takes the directory lock.
    ///
    /// # Errors
    ///
    /// `LogfileLocked` if another manager holds the lock, `InvalidConfig`
    /// if `path` is not a directory.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            info!(path = ?path, "WAL directory does not exist, creating it");
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_config(format!(
                "WAL path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::LogfileLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the SHUTDOWN file.
    #[must_use]
    pub fn shutdown_path(&self) -> PathBuf {
        self.path.join(SHUTDOWN_FILE)
    }

    /// Path of logfile `id`.
    #[must_use]
    pub fn logfile_path(&self, id: FileId) -> PathBuf {
        self.path.join(format!("{LOGFILE_PREFIX}{id}{SUFFIX}"))
    }

    /// Path logfile `id` is created under before it is complete.
    #[must_use]
    pub fn temp_path(&self, id: FileId) -> PathBuf {
        self.path.join(format!("{TEMP_PREFIX}{id}{SUFFIX}"))
    }

    /// Lists the ids of all logfiles, sorted.
    ///
    /// Files named `logfile-0.db` are reported and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn logfile_ids(&self) -> CoreResult<Vec<FileId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let name = entry?.file_name();
            let Some(id) = name.to_str().and_then(|n| parse_id(n, LOGFILE_PREFIX)) else {
                continue;
            };
            if id == 0 {
                warn!(file = ?name, "encountered invalid id for logfile, ids must be > 0");
                continue;
            }
            ids.push(FileId::new(id));
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Deletes leftover `temp-<id>.db` files from an interrupted creation.
    ///
    /// Returns the number of files removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn remove_temp_files(&self) -> CoreResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_str().and_then(|n| parse_id(n, TEMP_PREFIX)).is_none() {
                continue;
            }
            warn!(file = ?name, "removing incomplete logfile");
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => warn!(file = ?name, "cannot remove incomplete logfile: {err}"),
            }
        }
        if removed > 0 {
            self.sync()?;
        }
        Ok(removed)
    }

    /// Fsyncs the directory so creations, renames and deletions are
    /// durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened or synced.
    #[cfg(unix)]
    pub fn sync(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    /// No-op: NTFS journals metadata updates.
    ///
    /// # Errors
    ///
    /// Never fails.
    #[cfg(not(unix))]
    pub fn sync(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Parses `<prefix><id>.db`.
fn parse_id(name: &str, prefix: &str) -> Option<u64> {
    name.strip_prefix(prefix)?
        .strip_suffix(SUFFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let _dir = WalDir::open(temp.path()).unwrap();
        assert!(matches!(
            WalDir::open(temp.path()),
            Err(CoreError::LogfileLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        drop(WalDir::open(temp.path()).unwrap());
        assert!(WalDir::open(temp.path()).is_ok());
    }

    #[test]
    fn creates_missing_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a").join("journals");
        let dir = WalDir::open(&path).unwrap();
        assert!(path.is_dir());
        assert_eq!(dir.path(), path);
    }

    #[test]
    fn lists_logfiles_in_id_order() {
        let temp = tempdir().unwrap();
        let dir = WalDir::open(temp.path()).unwrap();
        for name in [
            "logfile-20.db",
            "logfile-3.db",
            "logfile-0.db",
            "logfile-x.db",
            "logfile-4.db.corrupted",
            "temp-5.db",
            "SHUTDOWN",
        ] {
            fs::write(temp.path().join(name), b"").unwrap();
        }
        assert_eq!(
            dir.logfile_ids().unwrap(),
            vec![FileId::new(3), FileId::new(20)]
        );
    }

    #[test]
    fn removes_temp_files() {
        let temp = tempdir().unwrap();
        let dir = WalDir::open(temp.path()).unwrap();
        fs::write(dir.temp_path(FileId::new(5)), b"partial").unwrap();
        fs::write(dir.logfile_path(FileId::new(6)), b"keep").unwrap();

        assert_eq!(dir.remove_temp_files().unwrap(), 1);
        assert!(!dir.temp_path(FileId::new(5)).exists());
        assert!(dir.logfile_path(FileId::new(6)).exists());
    }

    #[test]
    fn paths_are_correct() {
        let temp = tempdir().unwrap();
        let dir = WalDir::open(temp.path()).unwrap();
        assert_eq!(
            dir.logfile_path(FileId::new(42)),
            temp.path().join("logfile-42.db")
        );
        assert_eq!(dir.temp_path(FileId::new(42)), temp.path().join("temp-42.db"));
        assert_eq!(dir.shutdown_path(), temp.path().join("SHUTDOWN"));
    }
}
