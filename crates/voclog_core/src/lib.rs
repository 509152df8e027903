//! # voclog Core
//!
//! Datafiles and the write-ahead log for voclog.
//!
//! This crate provides:
//! - Markers: checksummed, 8-byte aligned records
//! - Datafiles: append-only memory-mapped files of markers, with a
//!   crash-recovery scanner and repair tools
//! - Logfiles: datafiles with a WAL lifecycle
//!   (Empty, Open, SealRequested, Sealed, Collected)
//! - Slots: the concurrent WAL allocator with group commit
//! - The logfile manager: recovery, reserve logfiles and background threads
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voclog_core::{LogfileManager, MarkerBuf, TickServer, TransactionId, WalConfig};
//! use voclog_core::{CollectionId, DatabaseId};
//!
//! let config = WalConfig::new("/var/lib/voclog/journals");
//! let wal = LogfileManager::open(config, Arc::new(TickServer::new(0)))?;
//!
//! let mut marker = MarkerBuf::document(TransactionId::new(1), b"{\"_key\":\"a\"}");
//! let tick = wal.append(DatabaseId::new(1), CollectionId::new(7), &mut marker, true)?;
//!
//! wal.read_range(tick, tick, |_, marker| {
//!     assert_eq!(marker.tick(), tick);
//!     true
//! })?;
//! wal.shutdown()?;
//! # Ok::<(), voclog_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod datafile;
mod error;
mod logfile;
pub mod manager;
pub mod marker;
pub mod slots;
mod tick;
mod types;

pub use config::{WalConfig, MAX_ENTRY_SIZE, MAX_LOGFILE_SIZE, MIN_LOGFILE_SIZE, MIN_SLOTS};
pub use datafile::{Datafile, DatafileState, RepairOutcome, ScanReport};
pub use error::{CoreError, CoreResult};
pub use logfile::{Logfile, LogfileStatus};
pub use manager::{LogfileManager, LogfileRange, WalState};
pub use marker::{Marker, MarkerBody, MarkerBuf, MarkerHeader, MarkerType};
pub use slots::{SlotInfo, Slots, SlotsStatistics, SyncRegion};
pub use tick::{TickServer, TickSource};
pub use types::{CollectionId, DatabaseId, FileId, Tick, TransactionId, MAX_TICK};
