//! CLI command implementations.

pub mod check;
pub mod dump;
pub mod inspect;
pub mod repair;

use std::fs;
use std::path::{Path, PathBuf};

/// File name prefixes of datafiles in a WAL or collection directory.
const DATAFILE_PREFIXES: [&str; 4] = ["logfile-", "journal-", "datafile-", "compaction-"];

/// Returns `path` itself if it is a file, otherwise the datafiles in the
/// directory ordered by file id.
pub fn datafile_paths(path: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(format!("No datafile or directory at {:?}", path).into());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(id) = datafile_id(name) {
            found.push((id, entry.path()));
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Parses the id out of `<prefix><id>.db`.
fn datafile_id(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".db")?;
    DATAFILE_PREFIXES
        .iter()
        .find_map(|prefix| stem.strip_prefix(prefix))
        .and_then(|id| id.parse().ok())
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use voclog_core::{Datafile, FileId, MarkerBuf, TickServer, TransactionId};

    /// Writes a datafile with `count` documents; sealed if `seal`.
    pub(crate) fn write_datafile(path: &Path, count: u8, seal: bool) -> Vec<usize> {
        let ticks = TickServer::new(0);
        let mut df = Datafile::create(Some(path), FileId::new(1), 64 * 1024, true).unwrap();
        let mut positions = Vec::new();
        for i in 0..count {
            let mut marker = MarkerBuf::document(TransactionId::new(1), &[i; 40]);
            let position = df.reserve(marker.size(), 0).unwrap();
            df.write_with_crc(position, &mut marker, &ticks, false)
                .unwrap();
            positions.push(position);
        }
        if seal {
            df.seal().unwrap();
        } else {
            df.sync().unwrap();
        }
        positions
    }

    #[test]
    fn directory_lists_datafiles_by_id() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["logfile-20.db", "logfile-3.db", "temp-4.db", "SHUTDOWN", "logfile-x.db"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let paths = datafile_paths(dir.path()).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["logfile-3.db", "logfile-20.db"]);
    }

    #[test]
    fn file_is_taken_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anything.bin");
        fs::write(&path, b"").unwrap();
        assert_eq!(datafile_paths(&path).unwrap(), vec![path]);
        assert!(datafile_paths(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(10), "10");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
