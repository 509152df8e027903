//! # voclog Testkit
//!
//! Test utilities for voclog.
//!
//! This crate provides:
//! - Temporary WAL directories with a running logfile manager
//! - Property-based marker generators using proptest
//! - Corruption helpers for crash-recovery tests
//! - Concurrent append stress testing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use voclog_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_wal() {
//!     let mut wal = TempWal::new();
//!     let tick = wal.append_document(b"{}");
//!     wal.reopen();
//!     assert_eq!(wal.documents()[0].0, tick);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
