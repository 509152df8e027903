//! Offline repair of damaged datafiles.

use super::{with_suffix, Datafile, ScanFix, ScanReport};
use crate::error::{CoreError, CoreResult};
use crate::marker::{MarkerType, JOURNAL_OVERHEAD};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Suffix of the copy being built by [`truncate_and_reseal`].
const NEW_SUFFIX: &str = ".new";

/// Suffix the damaged original is kept under.
const CORRUPTED_SUFFIX: &str = ".corrupted";

/// Result of a repair attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The datafile needed no repair.
    Intact,
    /// Damage was fixed in place: a torn tail was cut off or corrupt markers
    /// were blanked.
    Repaired(ScanReport),
    /// The datafile was rewritten up to `position` and sealed.
    Truncated {
        /// End of the data that was kept.
        position: usize,
        /// Number of markers copied, header included.
        markers: usize,
        /// Where the damaged original was moved.
        backup: PathBuf,
    },
}

/// Opens a datafile in repair mode and makes the repairs persistent.
///
/// Torn tails and single corrupt markers are fixed in place. If the scanner
/// had to give up on the rest of the file, the intact prefix is rewritten
/// with [`truncate_and_reseal`].
///
/// # Errors
///
/// Returns an error if the file has no readable header or cannot be
/// rewritten.
pub fn try_repair(path: &Path) -> CoreResult<RepairOutcome> {
    let (datafile, report) = Datafile::open_with_report(path, true)?;
    drop(datafile);

    let truncated_at = report.fixes.iter().find_map(|fix| match fix {
        ScanFix::Truncated { position } => Some(*position),
        _ => None,
    });
    if let Some(position) = truncated_at {
        return truncate_and_reseal(path, position);
    }

    if report.repaired() {
        info!(path = ?path, fixes = report.fixes.len(), "repaired datafile in place");
        Ok(RepairOutcome::Repaired(report))
    } else {
        Ok(RepairOutcome::Intact)
    }
}

/// Rewrites the markers that end at or before `position` into a fresh,
/// sealed datafile that replaces `path`.
///
/// The copy is built at `<path>.new`; the original is kept as
/// `<path>.corrupted`.
///
/// # Errors
///
/// Returns an error if the original has no readable header, if
/// `<path>.new` already exists, or if a rename fails.
pub fn truncate_and_reseal(path: &Path, position: usize) -> CoreResult<RepairOutcome> {
    let (source, report) = Datafile::open_read_only(path)?;
    if !report.ok {
        if let Some(diagnosis) = &report.diagnosis {
            warn!(path = ?path, "copying datafile up to {}: {diagnosis}", diagnosis.position);
        }
    }

    let new_path = with_suffix(path, NEW_SUFFIX);
    let size = source.initial_size().max(position) + JOURNAL_OVERHEAD;
    let mut target = Datafile::create(Some(&new_path), source.fid(), size, false)?;

    let mut markers = 0;
    let mut end = 0;
    let mut failure = None;
    source.iterate(|marker| {
        if marker.position() + marker.size() > position
            || marker.marker_type() == Some(MarkerType::Footer)
        {
            return false;
        }
        let copied = target
            .reserve(marker.size(), 0)
            .and_then(|at| target.write(at, marker.bytes(), false));
        match copied {
            Ok(()) => {
                target.update_ticks(marker.header());
                markers += 1;
                end = marker.position() + marker.header().aligned_size();
                true
            }
            Err(err) => {
                failure = Some(err);
                false
            }
        }
    })?;
    if let Some(err) = failure {
        drop(target);
        let _ = fs::remove_file(&new_path);
        return Err(err);
    }
    if markers == 0 {
        drop(target);
        let _ = fs::remove_file(&new_path);
        return Err(CoreError::unreadable(format!(
            "no intact markers before position {position} in {}",
            path.display()
        )));
    }

    target.seal()?;
    drop(source);

    let backup = with_suffix(path, CORRUPTED_SUFFIX);
    fs::rename(path, &backup)?;
    target.rename(path)?;
    target.close();

    info!(
        path = ?path,
        backup = ?backup,
        position = end,
        markers,
        "truncated and resealed datafile"
    );
    Ok(RepairOutcome::Truncated {
        position: end,
        markers,
        backup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datafile::DatafileState;
    use crate::marker::MarkerBuf;
    use crate::tick::TickServer;
    use crate::types::{FileId, TransactionId};
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::tempdir;

    const KB64: usize = 64 * 1024;

    fn build(path: &Path, count: usize) -> Vec<usize> {
        let ticks = TickServer::new(0);
        let mut df = Datafile::create(Some(path), FileId::new(7), KB64, true).unwrap();
        let mut positions = Vec::new();
        for i in 0..count {
            let mut marker = MarkerBuf::document(TransactionId::new(i as u64), &[0xAB; 76]);
            let position = df.reserve(marker.size(), 0).unwrap();
            df.write_with_crc(position, &mut marker, &ticks, false).unwrap();
            positions.push(position);
        }
        df.sync().unwrap();
        positions
    }

    fn smash(path: &Path, offset: usize) {
        let mut file = OpenOptions::new().write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(offset as u64)).unwrap();
        file.write_all(b"garbage!").unwrap();
        file.sync_all().unwrap();
    }

    #[test]
    fn intact_file_is_left_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-7.db");
        build(&path, 3);
        assert_eq!(try_repair(&path).unwrap(), RepairOutcome::Intact);
    }

    #[test]
    fn blanked_marker_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-7.db");
        let positions = build(&path, 3);
        smash(&path, positions[0] + 40);

        match try_repair(&path).unwrap() {
            RepairOutcome::Repaired(report) => assert_eq!(report.fixes.len(), 1),
            other => panic!("unexpected outcome {other:?}"),
        }

        let (df, report) = Datafile::open_with_report(&path, false).unwrap();
        assert!(report.ok);
        assert!(report.fixes.is_empty());
        assert_eq!(report.markers, 4);
        assert_eq!(df.state(), DatafileState::Write);
    }

    #[test]
    fn unrepairable_tail_is_resealed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-7.db");
        let positions = build(&path, 4);
        smash(&path, positions[2] + 40);
        smash(&path, positions[3] + 40);

        let outcome = try_repair(&path).unwrap();
        let backup = with_suffix(&path, CORRUPTED_SUFFIX);
        assert_eq!(
            outcome,
            RepairOutcome::Truncated {
                position: positions[2],
                markers: 3,
                backup: backup.clone(),
            }
        );
        assert!(backup.exists());
        assert!(!with_suffix(&path, NEW_SUFFIX).exists());

        let (df, report) = Datafile::open_with_report(&path, false).unwrap();
        assert!(report.ok);
        assert!(df.is_sealed());
        assert_eq!(df.fid(), FileId::new(7));
        assert_eq!(report.markers, 4);
        assert_eq!(df.current_size(), positions[2] + 16);
        assert_eq!(df.tick_max(), 2);
    }

    #[test]
    fn truncate_at_marker_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-7.db");
        let positions = build(&path, 5);

        // a position inside a marker keeps only the markers before it
        let outcome = truncate_and_reseal(&path, positions[3] + 10).unwrap();
        match outcome {
            RepairOutcome::Truncated {
                position, markers, ..
            } => {
                assert_eq!(position, positions[3]);
                assert_eq!(markers, 4);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let df = Datafile::open(&path, false).unwrap();
        assert!(df.is_sealed());
        assert_eq!(df.tick_max(), 3);
    }

    #[test]
    fn truncate_before_header_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logfile-7.db");
        build(&path, 1);
        assert!(matches!(
            truncate_and_reseal(&path, 8),
            Err(CoreError::DatafileUnreadable { .. })
        ));
        assert!(!with_suffix(&path, NEW_SUFFIX).exists());
        assert!(path.exists());
    }
}
