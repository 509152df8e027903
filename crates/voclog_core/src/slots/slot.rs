//! Ring entries and the handle writers fill.

use crate::error::{CoreError, CoreResult};
use crate::logfile::Logfile;
use crate::marker::MarkerBuf;
use crate::types::{FileId, Tick};
use std::fmt;
use std::sync::Arc;

/// State of a ring entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotStatus {
    Unused,
    Used,
    Returned,
}

/// One entry of the slot ring.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) status: SlotStatus,
    pub(crate) tick: Tick,
    pub(crate) logfile: Option<Arc<Logfile>>,
    pub(crate) offset: usize,
    pub(crate) size: usize,
    pub(crate) wait_for_sync: bool,
}

impl Slot {
    pub(crate) const fn new() -> Self {
        Self {
            status: SlotStatus::Unused,
            tick: 0,
            logfile: None,
            offset: 0,
            size: 0,
            wait_for_sync: false,
        }
    }

    pub(crate) fn is_unused(&self) -> bool {
        self.status == SlotStatus::Unused
    }

    pub(crate) fn is_returned(&self) -> bool {
        self.status == SlotStatus::Returned
    }

    pub(crate) fn logfile_id(&self) -> Option<FileId> {
        self.logfile.as_ref().map(|lf| lf.id())
    }

    pub(crate) fn hand_out(&mut self, logfile: Arc<Logfile>, offset: usize, size: usize, tick: Tick) {
        self.status = SlotStatus::Used;
        self.tick = tick;
        self.logfile = Some(logfile);
        self.offset = offset;
        self.size = size;
        self.wait_for_sync = false;
    }

    pub(crate) fn mark_returned(&mut self, wait_for_sync: bool) {
        self.status = SlotStatus::Returned;
        self.wait_for_sync = wait_for_sync;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}

/// A reserved range in a logfile, handed out by
/// [`Slots::next_unused`](super::Slots::next_unused).
///
/// Fill it with [`fill`](Self::fill) and hand it back with
/// [`Slots::return_used`](super::Slots::return_used).
pub struct SlotInfo {
    pub(crate) index: usize,
    pub(crate) logfile: Arc<Logfile>,
    pub(crate) offset: usize,
    pub(crate) size: usize,
    pub(crate) tick: Tick,
}

impl SlotInfo {
    /// Tick assigned to this slot.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// ID of the logfile the slot lives in.
    #[must_use]
    pub fn logfile_id(&self) -> FileId {
        self.logfile.id()
    }

    /// Offset of the reserved range in the logfile.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size of the reserved range (aligned).
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Stamps the slot's tick and the CRC into `marker` and copies it into
    /// the reserved range.
    ///
    /// # Errors
    ///
    /// `IllegalState` if the marker is larger than the reservation, or any
    /// error of [`Logfile::write`].
    pub fn fill(&self, marker: &mut MarkerBuf) -> CoreResult<()> {
        if marker.size() > self.size {
            return Err(CoreError::illegal_state(format!(
                "marker of {} bytes does not fit into slot of {} bytes",
                marker.size(),
                self.size
            )));
        }
        marker.set_tick(self.tick);
        self.logfile.write(self.offset, marker)
    }
}

impl fmt::Debug for SlotInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotInfo")
            .field("index", &self.index)
            .field("logfile", &self.logfile.id())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("tick", &self.tick)
            .finish()
    }
}
