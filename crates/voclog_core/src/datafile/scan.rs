//! Crash-recovery scanner.
//!
//! Walks a datafile's markers validating size, type and CRC, and rebuilds
//! `current_size`, the tick bounds and the sealed flag.
//!
//! Two kinds of damage are treated differently:
//!
//! - a CRC mismatch followed only by zero bytes is a marker torn off by a
//!   crash; it is always cut off, repair mode or not
//! - anything else fails the scan unless `ignore_failures` is set, in which
//!   case a single bad marker followed by a sound one is overwritten with a
//!   blank marker of the same size, and otherwise the datafile is truncated
//!   at the last good position

use super::{Datafile, DatafileState};
use crate::error::{CoreError, CoreResult};
use crate::marker::{
    aligned_size, check_crc, crc_pair, MarkerBuf, MarkerHeader, MarkerType, MARKER_HEADER_SIZE,
};
use crate::types::Tick;
use std::fmt;
use tracing::{info, warn};

/// Padding markers with type 0 below this size are skipped instead of
/// failing the scan.
const PADDING_LIMIT: u32 = 128;

/// What kind of damage the scanner found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// `size` is non-zero but below the header size.
    SizeTooSmall,
    /// Type byte or size outside the valid range.
    InvalidMarker,
    /// Stored and computed CRC differ, or the marker runs past the mapping.
    CrcMismatch {
        /// CRC stored in the marker.
        expected: u32,
        /// CRC computed over the marker bytes (0 if out of bounds).
        actual: u32,
        /// Whether the marker after this one looks sound.
        next_marker_ok: bool,
    },
}

/// Where and why a scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnosis {
    /// Offset of the bad marker.
    pub position: usize,
    /// Raw type byte of the bad marker.
    pub marker_type: u8,
    /// Size field of the bad marker.
    pub size: u32,
    /// Kind of damage.
    pub kind: Corruption,
}

impl Diagnosis {
    /// Converts the diagnosis into the error reported to callers.
    #[must_use]
    pub fn to_error(&self) -> CoreError {
        match self.kind {
            Corruption::CrcMismatch {
                expected, actual, ..
            } => CoreError::CrcMismatch {
                position: self.position,
                marker_type: self.marker_type,
                expected,
                actual,
            },
            Corruption::SizeTooSmall => CoreError::corrupted(format!(
                "marker at {} has size {} below header size",
                self.position, self.size
            )),
            Corruption::InvalidMarker => CoreError::corrupted(format!(
                "invalid marker at {}: type {}, size {}",
                self.position, self.marker_type, self.size
            )),
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_error())
    }
}

/// A change the scanner applied (or, for padding, tolerated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFix {
    /// Type-0 padding skipped.
    SkippedPadding {
        /// Offset of the padding.
        position: usize,
        /// Its size field.
        size: u32,
    },
    /// A torn last marker was cut off.
    TornTail {
        /// New end of valid data.
        position: usize,
    },
    /// A corrupt marker was replaced by a blank marker.
    Blanked {
        /// Offset of the blanked marker.
        position: usize,
        /// Its size.
        size: u32,
    },
    /// Everything from `position` on was made unreachable.
    Truncated {
        /// New end of valid data.
        position: usize,
    },
}

/// Outcome of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Whether the datafile is usable.
    pub ok: bool,
    /// Number of valid markers seen (blanked markers included).
    pub markers: usize,
    /// Offset just past the last valid marker.
    pub last_good_position: usize,
    /// `current_size` after the scan.
    pub current_size: usize,
    /// Whether a footer was found.
    pub sealed: bool,
    /// Largest tick of any marker.
    pub max_tick: Tick,
    /// Repairs applied during the scan.
    pub fixes: Vec<ScanFix>,
    /// Why the scan failed or what was repaired last.
    pub diagnosis: Option<Diagnosis>,
}

impl ScanReport {
    /// Returns `true` if the scan changed the datafile.
    #[must_use]
    pub fn repaired(&self) -> bool {
        self.fixes
            .iter()
            .any(|f| !matches!(f, ScanFix::SkippedPadding { .. }))
    }
}

enum Step {
    End,
    Marker(MarkerHeader),
    Padding(MarkerHeader),
    Corrupt(Diagnosis),
    TornTail,
    BadCrc(Diagnosis),
}

fn classify(data: &[u8], position: usize) -> Step {
    let end = data.len();
    let Some(header) = data.get(position..).and_then(MarkerHeader::parse) else {
        return Step::End;
    };
    if header.size == 0 {
        return Step::End;
    }

    let diagnosis = |kind| Diagnosis {
        position,
        marker_type: header.type_byte,
        size: header.size,
        kind,
    };

    if (header.size as usize) < MARKER_HEADER_SIZE {
        return Step::Corrupt(diagnosis(Corruption::SizeTooSmall));
    }
    if !header.is_valid() {
        if header.type_byte == 0 && header.size < PADDING_LIMIT {
            return Step::Padding(header);
        }
        return Step::Corrupt(diagnosis(Corruption::InvalidMarker));
    }

    let (expected, actual) = match crc_pair(data, position) {
        Some((stored, computed)) if stored == computed => return Step::Marker(header),
        Some(pair) => pair,
        None => (header.crc, 0),
    };

    let marker_end = position.saturating_add(header.size as usize);
    let mut next_marker_ok = false;
    if marker_end < end {
        if data[marker_end..].iter().all(|&b| b == 0) {
            return Step::TornTail;
        }
        let next = position.saturating_add(header.aligned_size());
        next_marker_ok = if next < end {
            data.get(next..)
                .and_then(MarkerHeader::parse)
                .is_some_and(|h| {
                    h.type_byte != 0
                        && h.size as usize >= MARKER_HEADER_SIZE
                        && next + h.size as usize <= end
                        && h.is_valid()
                        && check_crc(data, next)
                })
        } else {
            true
        };
    }

    Step::BadCrc(diagnosis(Corruption::CrcMismatch {
        expected,
        actual,
        next_marker_ok,
    }))
}

impl Datafile {
    /// Runs the recovery scanner and returns `true` if the datafile is
    /// usable afterwards.
    pub fn check(&mut self, ignore_failures: bool) -> bool {
        self.scan(ignore_failures).ok
    }

    /// Runs the recovery scanner.
    ///
    /// On success `current_size`, the tick bounds and the sealed flag
    /// reflect the file contents. On failure the datafile enters
    /// `OpenError` and the report carries a diagnosis.
    pub fn scan(&mut self, ignore_failures: bool) -> ScanReport {
        self.try_scan(ignore_failures).unwrap_or_default()
    }

    /// Like [`Datafile::scan`], but a repair that cannot be written out is
    /// returned as an error instead of a failed report.
    pub(super) fn try_scan(&mut self, ignore_failures: bool) -> CoreResult<ScanReport> {
        let mut report = ScanReport::default();
        let end = self.region.len();
        self.ticks.reset();
        self.is_sealed = false;

        let mut position = 0;
        loop {
            let step = match self.region.read(0, end) {
                Ok(data) => classify(data, position),
                Err(err) => {
                    warn!(fid = %self.fid, "cannot read datafile: {err}");
                    self.state = DatafileState::OpenError;
                    return Ok(report);
                }
            };

            match step {
                Step::End => {
                    *self.current_size.get_mut() = position;
                    report.ok = true;
                    break;
                }
                Step::Padding(header) => {
                    warn!(
                        fid = %self.fid,
                        position,
                        size = header.size,
                        "ignoring suspicious marker with type 0"
                    );
                    report.fixes.push(ScanFix::SkippedPadding {
                        position,
                        size: header.size,
                    });
                    position += header.aligned_size();
                }
                Step::Marker(header) => {
                    self.ticks.update(&header);
                    report.max_tick = report.max_tick.max(header.tick);
                    report.markers += 1;
                    position += header.aligned_size();
                    report.last_good_position = position;

                    if header.marker_type() == Some(MarkerType::Footer) {
                        *self.current_size.get_mut() = position;
                        self.is_sealed = true;
                        report.ok = true;
                        break;
                    }
                }
                Step::TornTail => {
                    warn!(
                        fid = %self.fid,
                        path = ?self.path(),
                        position,
                        "datafile automatically truncated at last marker"
                    );
                    if self.region.is_writable() {
                        // later appends must not run into the torn bytes
                        if let Err(err) = self.region.fill(position, end - position, 0) {
                            warn!(fid = %self.fid, position, "cannot clear torn tail: {err}");
                            self.state = DatafileState::OpenError;
                            return Err(err.into());
                        }
                    }
                    *self.current_size.get_mut() = position;
                    report.fixes.push(ScanFix::TornTail { position });
                    report.ok = true;
                    break;
                }
                Step::Corrupt(diagnosis) => {
                    warn!(fid = %self.fid, path = ?self.path(), "{diagnosis}");
                    report.diagnosis = Some(diagnosis);
                    if ignore_failures {
                        self.fix(position);
                        report.fixes.push(ScanFix::Truncated { position });
                        report.ok = true;
                    } else {
                        *self.current_size.get_mut() = position;
                        self.state = DatafileState::OpenError;
                    }
                    break;
                }
                Step::BadCrc(diagnosis) => {
                    warn!(fid = %self.fid, path = ?self.path(), "{diagnosis}");
                    let next_marker_ok = matches!(
                        diagnosis.kind,
                        Corruption::CrcMismatch {
                            next_marker_ok: true,
                            ..
                        }
                    );
                    if next_marker_ok {
                        info!("data directly following this marker looks ok so repairing the marker may recover it");
                    } else {
                        warn!("data directly following this marker cannot be analyzed");
                    }
                    report.diagnosis = Some(diagnosis);

                    if !ignore_failures {
                        *self.current_size.get_mut() = position;
                        self.state = DatafileState::OpenError;
                        break;
                    }
                    if next_marker_ok && self.blank(position, diagnosis.size) {
                        report.fixes.push(ScanFix::Blanked {
                            position,
                            size: diagnosis.size,
                        });
                        report.markers += 1;
                        position += aligned_size(diagnosis.size as usize);
                        report.last_good_position = position;
                        continue;
                    }
                    self.fix(position);
                    report.fixes.push(ScanFix::Truncated { position });
                    report.ok = true;
                    break;
                }
            }
        }

        report.current_size = self.current_size();
        report.sealed = self.is_sealed;
        Ok(report)
    }

    /// Overwrites the marker at `position` with a blank marker of `size`
    /// bytes. Returns `false` if the region cannot be written.
    fn blank(&self, position: usize, size: u32) -> bool {
        let mut blank = MarkerBuf::blank(size as usize);
        blank.finalize_crc();
        match self.region.write(position, blank.as_bytes()) {
            Ok(()) => {
                warn!(fid = %self.fid, position, size, "replaced corrupt marker with blank marker");
                true
            }
            Err(err) => {
                warn!(fid = %self.fid, position, "cannot blank corrupt marker: {err}");
                false
            }
        }
    }
}
