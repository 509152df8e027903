//! Check command implementation.

use super::datafile_paths;
use std::path::Path;
use voclog_core::datafile::ScanFix;
use voclog_core::Datafile;

/// Result of checking one datafile.
#[derive(Debug)]
pub struct CheckResult {
    /// Number of valid markers.
    pub markers: usize,
    /// Whether the datafile would open without repair.
    pub ok: bool,
    /// Damage a repair would fix, in scan order.
    pub problems: Vec<String>,
}

/// Runs the check command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Checking {:?}", path);
    println!();

    let mut failed = 0;
    for datafile in datafile_paths(path)? {
        let result = check(&datafile);
        let mark = if result.ok { "✓" } else { "✗" };
        println!("{mark} {} ({} markers)", datafile.display(), result.markers);
        for problem in &result.problems {
            println!("    {problem}");
        }
        if !result.ok {
            failed += 1;
        }
    }

    println!();
    if failed == 0 {
        println!("✓ All datafiles passed");
        Ok(())
    } else {
        println!("✗ {failed} datafile(s) need repair");
        Err("Check failed".into())
    }
}

/// Scans a datafile without writing to it.
pub fn check(path: &Path) -> CheckResult {
    let (_datafile, report) = match Datafile::open_read_only(path) {
        Ok(opened) => opened,
        Err(err) => {
            return CheckResult {
                markers: 0,
                ok: false,
                problems: vec![err.to_string()],
            }
        }
    };

    let mut problems: Vec<String> = report
        .fixes
        .iter()
        .filter_map(|fix| match fix {
            ScanFix::SkippedPadding { position, size } => {
                Some(format!("padding of {size} bytes at {position}"))
            }
            ScanFix::TornTail { position } => Some(format!("torn last marker at {position}")),
            _ => None,
        })
        .collect();
    if let Some(diagnosis) = report.diagnosis.filter(|_| !report.ok) {
        problems.push(diagnosis.to_string());
    }

    CheckResult {
        markers: report.markers,
        ok: report.ok,
        problems,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::write_datafile;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    #[test]
    fn sound_datafile_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logfile-1.db");
        write_datafile(&path, 4, true);
        let result = check(&path);
        assert!(result.ok);
        assert!(result.problems.is_empty());
        assert_eq!(result.markers, 6);
    }

    #[test]
    fn corrupted_marker_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logfile-1.db");
        let positions = write_datafile(&path, 4, false);

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(positions[1] as u64 + 30)).unwrap();
        file.write_all(b"xx").unwrap();
        drop(file);

        let result = check(&path);
        assert!(!result.ok);
        assert_eq!(result.problems.len(), 1);
        assert_eq!(result.markers, 2);
    }
}
