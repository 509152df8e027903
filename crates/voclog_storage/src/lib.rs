//! # voclog Storage
//!
//! Memory-mapped regions for voclog datafiles.
//!
//! This crate provides the lowest-level storage abstraction for voclog.
//! Regions are **opaque byte stores** - they do not interpret the markers
//! written into them.
//!
//! ## Design Principles
//!
//! - Regions are fixed-size mappings (read, write, flush, protect)
//! - Every access is bounds-checked; no raw pointers leak out
//! - No knowledge of markers, datafiles or the WAL
//! - This is the only voclog crate that contains `unsafe` code
//!
//! ## Available Regions
//!
//! - [`FileRegion`] - a zero-filled file mapped with `MAP_SHARED`
//! - [`AnonymousRegion`] - anonymous memory for in-memory datafiles
//!
//! ## Example
//!
//! ```rust
//! use voclog_storage::{AnonymousRegion, MappedRegion};
//!
//! let region = AnonymousRegion::new(4096).unwrap();
//! region.write(0, b"hello world").unwrap();
//! assert_eq!(region.read(0, 11).unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod mapping;
mod memory;
mod page;
mod region;

pub use error::{StorageError, StorageResult};
pub use file::FileRegion;
pub use memory::AnonymousRegion;
pub use page::{page_size, round_to_page};
pub use region::MappedRegion;
