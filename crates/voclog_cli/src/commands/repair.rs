//! Repair and truncate command implementations.

use super::datafile_paths;
use std::path::Path;
use tracing::info;
use voclog_core::datafile::{truncate_and_reseal, try_repair, RepairOutcome, ScanFix};

/// Runs the repair command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    for datafile in datafile_paths(path)? {
        info!("Repairing {:?}", datafile);
        let outcome = try_repair(&datafile)?;
        println!("{}: {}", datafile.display(), describe(&outcome));
    }
    Ok(())
}

/// Runs the truncate command.
pub fn truncate(path: &Path, position: usize) -> Result<(), Box<dyn std::error::Error>> {
    info!("Truncating {:?} at {}", path, position);
    let outcome = truncate_and_reseal(path, position)?;
    println!("{}: {}", path.display(), describe(&outcome));
    Ok(())
}

/// One line describing a repair outcome.
pub fn describe(outcome: &RepairOutcome) -> String {
    match outcome {
        RepairOutcome::Intact => "intact".to_string(),
        RepairOutcome::Repaired(report) => {
            let fixes: Vec<String> = report
                .fixes
                .iter()
                .filter_map(|fix| match fix {
                    ScanFix::TornTail { position } => Some(format!("cut torn tail at {position}")),
                    ScanFix::Blanked { position, size } => {
                        Some(format!("blanked {size} bytes at {position}"))
                    }
                    _ => None,
                })
                .collect();
            format!("repaired in place ({})", fixes.join(", "))
        }
        RepairOutcome::Truncated {
            position,
            markers,
            backup,
        } => format!(
            "kept {markers} markers up to {position} and sealed; original saved as {}",
            backup.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::check::check;
    use crate::commands::tests::write_datafile;

    #[test]
    fn truncation_leaves_a_sound_sealed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logfile-1.db");
        let positions = write_datafile(&path, 5, false);

        let outcome = truncate_and_reseal(&path, positions[3]).unwrap();
        let RepairOutcome::Truncated { markers, backup, .. } = &outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        // header and three documents
        assert_eq!(*markers, 4);
        assert!(backup.exists());
        assert!(describe(&outcome).starts_with("kept 4 markers"));

        let result = check(&path);
        assert!(result.ok);
        assert_eq!(result.markers, 5);
    }

    #[test]
    fn intact_file_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logfile-1.db");
        write_datafile(&path, 2, true);
        run(&path).unwrap();
        assert_eq!(describe(&try_repair(&path).unwrap()), "intact");
    }
}
