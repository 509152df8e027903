//! Crash recovery testing for voclog.
//!
//! A crash cannot be produced by dropping a [`LogfileManager`]: dropping
//! shuts the WAL down cleanly. These helpers instead leave files on disk
//! in the states a crash or a bad disk produces, for the next open to
//! recover from.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use voclog_testkit::crash::{write_unsealed_logfile, CrashPoint};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let logfile = write_unsealed_logfile(dir.path(), 1000, 5);
//! logfile.damage(CrashPoint::TornTail);
//! ```
//!
//! [`LogfileManager`]: voclog_core::LogfileManager

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use voclog_core::marker::MARKER_HEADER_SIZE;
use voclog_core::{
    Datafile, FileId, MarkerBuf, TickServer, TransactionId, MIN_LOGFILE_SIZE,
};

/// Ways a logfile can be left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// The process died before the footer was written.
    BeforeSeal,
    /// The last marker's payload never reached the disk.
    TornTail,
    /// A byte inside a marker in the middle of the file changed.
    FlippedByte,
    /// A marker header in the middle of the file was overwritten.
    OverwrittenHeader,
}

/// A logfile written without a footer, as a crash leaves it.
#[derive(Debug, Clone)]
pub struct UnsealedLogfile {
    /// Logfile path.
    pub path: PathBuf,
    /// Logfile id.
    pub id: u64,
    /// Start of each document marker.
    pub positions: Vec<usize>,
    /// Size of each document marker.
    pub sizes: Vec<usize>,
    /// Ticks of the documents.
    pub ticks: Vec<u64>,
}

impl UnsealedLogfile {
    /// Damages the logfile. Returns how many documents a repairing open
    /// still finds.
    pub fn damage(&self, point: CrashPoint) -> usize {
        let count = self.positions.len();
        match point {
            CrashPoint::BeforeSeal => count,
            CrashPoint::TornTail => {
                let last = count - 1;
                let payload = self.sizes[last] - MARKER_HEADER_SIZE;
                patch(
                    &self.path,
                    self.positions[last] + MARKER_HEADER_SIZE,
                    &vec![0u8; payload],
                );
                count - 1
            }
            CrashPoint::FlippedByte => {
                let middle = count / 2;
                flip_byte(&self.path, self.positions[middle] + self.sizes[middle] - 1);
                // the damaged marker is blanked, its neighbours survive
                count - 1
            }
            CrashPoint::OverwrittenHeader => {
                let middle = count / 2;
                patch(&self.path, self.positions[middle], &[0xFF; MARKER_HEADER_SIZE]);
                // nothing after an unreadable header can be trusted
                middle
            }
        }
    }
}

/// Writes `logfile-<id>.db` into `dir` with `count` document markers of
/// 100 payload bytes and no footer. Ticks start at `id + 1`.
pub fn write_unsealed_logfile(dir: &Path, id: u64, count: u8) -> UnsealedLogfile {
    let ticks = TickServer::new(id);
    let path = dir.join(format!("logfile-{id}.db"));
    let df = Datafile::create(Some(&path), FileId::new(id), MIN_LOGFILE_SIZE, true)
        .expect("Failed to create logfile");

    let mut logfile = UnsealedLogfile {
        path,
        id,
        positions: Vec::new(),
        sizes: Vec::new(),
        ticks: Vec::new(),
    };
    for i in 0..count {
        let mut marker = MarkerBuf::document(TransactionId::new(1), &[i; 100]);
        let position = df
            .reserve(marker.size(), 0)
            .expect("Failed to reserve marker");
        df.write_with_crc(position, &mut marker, &ticks, false)
            .expect("Failed to write marker");
        logfile.positions.push(position);
        logfile.sizes.push(marker.size());
        logfile.ticks.push(marker.tick());
    }
    df.sync().expect("Failed to sync logfile");
    logfile
}

/// Overwrites `bytes` at `offset`.
pub fn patch(path: &Path, offset: usize, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file for patching");
    file.seek(SeekFrom::Start(offset as u64))
        .expect("Failed to seek");
    file.write_all(bytes).expect("Failed to patch file");
}

/// Inverts the byte at `offset`.
pub fn flip_byte(path: &Path, offset: usize) {
    let mut data = fs::read(path).expect("Failed to read file");
    data[offset] = !data[offset];
    fs::write(path, data).expect("Failed to write file");
}

/// Cuts the file to `len` bytes.
pub fn truncate_file(path: &Path, len: u64) {
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(len))
        .expect("Failed to truncate file");
}

/// Removes SHUTDOWN, as if the WAL had never been opened.
pub fn remove_shutdown_file(dir: &Path) {
    let path = dir.join("SHUTDOWN");
    if path.exists() {
        fs::remove_file(path).expect("Failed to remove SHUTDOWN");
    }
}

/// Leaves a half-created reserve logfile behind.
pub fn write_temp_logfile(dir: &Path, id: u64) -> PathBuf {
    let path = dir.join(format!("temp-{id}.db"));
    fs::write(&path, vec![0u8; 4096]).expect("Failed to write temp file");
    path
}

/// Whether SHUTDOWN records a clean shutdown.
pub fn was_clean_shutdown(dir: &Path) -> bool {
    fs::read(dir.join("SHUTDOWN"))
        .ok()
        .and_then(|raw| serde_json::from_slice::<serde_json::Value>(&raw).ok())
        .is_some_and(|info| info.get("shutdownTime").is_some_and(|t| t.is_string()))
}
