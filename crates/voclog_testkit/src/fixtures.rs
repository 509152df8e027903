//! Test fixtures and WAL helpers.
//!
//! Provides temporary WAL directories with a running logfile manager
//! and small configurations that rotate logfiles quickly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use voclog_core::{
    CollectionId, DatabaseId, LogfileManager, MarkerBody, MarkerBuf, Tick, TickServer,
    TransactionId, WalConfig, MIN_LOGFILE_SIZE,
};

/// A configuration for tests: 1 MiB logfiles, 64 slots, one reserve
/// logfile, no historic logfiles and a short sync interval.
#[must_use]
pub fn test_config(directory: &Path) -> WalConfig {
    WalConfig::new(directory)
        .logfile_size(MIN_LOGFILE_SIZE)
        .number_of_slots(64)
        .reserve_logfiles(1)
        .historic_logfiles(0)
        .sync_interval(Duration::from_millis(5))
        .sync_timeout(Duration::from_secs(10))
        .allocation_timeout(Duration::from_secs(10))
}

/// A WAL in a temporary directory with automatic cleanup.
pub struct TempWal {
    /// The running manager, `None` between `close` and `reopen`.
    wal: Option<LogfileManager>,
    config: WalConfig,
    temp_dir: TempDir,
}

impl TempWal {
    /// Opens a WAL with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Opens a WAL with [`test_config`] adjusted by `f`.
    pub fn with_config(f: impl FnOnce(WalConfig) -> WalConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = f(test_config(temp_dir.path()));
        let wal = open_manager(config.clone());
        Self {
            wal: Some(wal),
            config,
            temp_dir,
        }
    }

    /// The WAL directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of the logfile with `id`.
    pub fn logfile_path(&self, id: u64) -> PathBuf {
        self.path().join(format!("logfile-{id}.db"))
    }

    /// The running manager.
    ///
    /// # Panics
    ///
    /// Panics if the WAL is closed.
    pub fn wal(&self) -> &LogfileManager {
        self.wal.as_ref().expect("WAL is closed")
    }

    /// Shuts the manager down cleanly, keeping the files.
    pub fn close(&mut self) {
        if let Some(wal) = self.wal.take() {
            wal.shutdown().expect("Failed to shut down WAL");
        }
    }

    /// Closes the WAL if needed and opens it again with the same
    /// configuration.
    pub fn reopen(&mut self) -> &LogfileManager {
        self.close();
        self.wal.insert(open_manager(self.config.clone()))
    }

    /// Appends a document marker carrying `blob` and waits for it to
    /// become durable.
    pub fn append_document(&self, blob: &[u8]) -> Tick {
        let mut marker = MarkerBuf::document(TransactionId::new(1), blob);
        self.wal()
            .append(DatabaseId::new(1), CollectionId::new(1), &mut marker, true)
            .expect("Failed to append document")
    }

    /// Ticks and blobs of all documents in the WAL, in tick order.
    pub fn documents(&self) -> Vec<(Tick, Vec<u8>)> {
        read_documents(self.wal())
    }
}

impl Default for TempWal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TempWal {
    type Target = LogfileManager;

    fn deref(&self) -> &Self::Target {
        self.wal()
    }
}

/// Opens a manager with a fresh tick server.
pub fn open_manager(config: WalConfig) -> LogfileManager {
    LogfileManager::open(config, Arc::new(TickServer::new(0))).expect("Failed to open WAL")
}

/// Ticks and blobs of all documents readable from `wal`.
pub fn read_documents(wal: &LogfileManager) -> Vec<(Tick, Vec<u8>)> {
    let mut out = Vec::new();
    wal.read_range(0, Tick::MAX, |_, marker| {
        if let Ok(MarkerBody::Document { blob, .. }) = marker.body() {
            out.push((marker.tick(), blob.to_vec()));
        }
        true
    })
    .expect("Failed to read WAL");
    out
}

/// Runs `f` against a temporary WAL.
///
/// # Example
///
/// ```rust,ignore
/// use voclog_testkit::with_temp_wal;
///
/// #[test]
/// fn my_test() {
///     with_temp_wal(|wal| {
///         wal.append_document(b"{}");
///     });
/// }
/// ```
pub fn with_temp_wal<F, R>(f: F) -> R
where
    F: FnOnce(&TempWal) -> R,
{
    let wal = TempWal::new();
    f(&wal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_survive_reopen() {
        let mut wal = TempWal::new();
        let a = wal.append_document(b"a");
        let b = wal.append_document(b"b");

        wal.reopen();
        assert_eq!(wal.documents(), vec![(a, b"a".to_vec()), (b, b"b".to_vec())]);
    }

    #[test]
    fn with_temp_wal_runs_closure() {
        let ticks = with_temp_wal(|wal| (wal.append_document(b"x"), wal.state().last_committed_tick));
        assert!(ticks.1 >= ticks.0);
    }

    #[test]
    fn config_is_small() {
        let wal = TempWal::with_config(|c| c.reserve_logfiles(2));
        assert_eq!(wal.directory(), wal.path());
    }
}
