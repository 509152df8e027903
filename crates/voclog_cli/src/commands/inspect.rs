//! Inspect command implementation.

use super::{datafile_paths, format_size};
use crate::Format;
use serde::Serialize;
use std::fs;
use std::path::Path;
use voclog_core::manager::ShutdownInfo;
use voclog_core::Datafile;

/// Inspection result for a WAL directory or a single datafile.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Inspected path.
    pub path: String,
    /// Contents of SHUTDOWN, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown: Option<ShutdownInfo>,
    /// One entry per datafile.
    pub datafiles: Vec<DatafileInfo>,
}

/// Header and scan summary of one datafile.
#[derive(Debug, Serialize)]
pub struct DatafileInfo {
    /// Datafile path.
    pub path: String,
    /// File size on disk in bytes.
    pub file_size: u64,
    /// File id from the header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fid: Option<u64>,
    /// Size recorded in the header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximal_size: Option<usize>,
    /// End of the valid markers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_size: Option<usize>,
    /// Whether a footer was found.
    pub sealed: bool,
    /// Number of valid markers.
    pub markers: usize,
    /// Lowest tick.
    pub tick_min: u64,
    /// Highest tick.
    pub tick_max: u64,
    /// Why the datafile could not be read to the end.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Format::Text => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the inspection result without printing it.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let shutdown = if path.is_dir() {
        read_shutdown(path)?
    } else {
        None
    };

    let datafiles = datafile_paths(path)?
        .iter()
        .map(|p| inspect_datafile(p))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        shutdown,
        datafiles,
    })
}

fn read_shutdown(dir: &Path) -> Result<Option<ShutdownInfo>, Box<dyn std::error::Error>> {
    let path = dir.join("SHUTDOWN");
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&raw)?))
}

fn inspect_datafile(path: &Path) -> Result<DatafileInfo, Box<dyn std::error::Error>> {
    let mut info = DatafileInfo {
        path: path.display().to_string(),
        file_size: fs::metadata(path)?.len(),
        fid: None,
        maximal_size: None,
        current_size: None,
        sealed: false,
        markers: 0,
        tick_min: 0,
        tick_max: 0,
        error: None,
    };

    match Datafile::open_read_only(path) {
        Ok((datafile, report)) => {
            info.fid = Some(datafile.fid().as_u64());
            info.maximal_size = Some(datafile.initial_size());
            info.current_size = Some(report.current_size);
            info.sealed = report.sealed;
            info.markers = report.markers;
            info.tick_min = datafile.tick_min();
            info.tick_max = datafile.tick_max();
            if !report.ok {
                info.error = report.diagnosis.map(|d| d.to_string());
            }
        }
        Err(err) => info.error = Some(err.to_string()),
    }
    Ok(info)
}

fn print_text_output(result: &InspectResult) {
    println!("voclog Inspection");
    println!("=================");
    println!();
    println!("Path: {}", result.path);

    if let Some(shutdown) = &result.shutdown {
        println!();
        println!("SHUTDOWN:");
        println!("  Tick:           {}", shutdown.tick);
        println!("  Last collected: {}", shutdown.last_collected);
        println!("  Last sealed:    {}", shutdown.last_sealed);
        match &shutdown.shutdown_time {
            Some(time) => println!("  Clean shutdown at {time}"),
            None => println!("  No clean shutdown recorded"),
        }
    }

    println!();
    println!("Datafiles: {}", result.datafiles.len());
    for df in &result.datafiles {
        println!();
        println!("  {}", df.path);
        println!("    File size:    {}", format_size(df.file_size));
        if let Some(fid) = df.fid {
            println!("    File id:      {fid}");
        }
        if let (Some(current), Some(maximal)) = (df.current_size, df.maximal_size) {
            println!(
                "    Used:         {} of {}",
                format_size(current as u64),
                format_size(maximal as u64)
            );
        }
        println!("    Sealed:       {}", df.sealed);
        println!("    Markers:      {}", df.markers);
        println!("    Ticks:        {} - {}", df.tick_min, df.tick_max);
        if let Some(error) = &df.error {
            println!("    Error:        {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::write_datafile;

    #[test]
    fn sealed_datafile_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logfile-1.db");
        write_datafile(&path, 3, true);

        let result = inspect(&path).unwrap();
        assert!(result.shutdown.is_none());
        let info = &result.datafiles[0];
        assert_eq!(info.fid, Some(1));
        assert!(info.sealed);
        // header, three documents, footer
        assert_eq!(info.markers, 5);
        assert_eq!((info.tick_min, info.tick_max), (1, 3));
        assert!(info.error.is_none());
    }

    #[test]
    fn directory_with_shutdown_file() {
        let dir = tempfile::tempdir().unwrap();
        write_datafile(&dir.path().join("logfile-1.db"), 1, false);
        fs::write(dir.path().join("logfile-2.db"), b"tiny").unwrap();
        fs::write(
            dir.path().join("SHUTDOWN"),
            br#"{"tick":"9","lastCollected":"0","lastSealed":"1"}"#,
        )
        .unwrap();

        let result = inspect(dir.path()).unwrap();
        let shutdown = result.shutdown.unwrap();
        assert_eq!(shutdown.tick, 9);
        assert!(shutdown.shutdown_time.is_none());
        assert_eq!(result.datafiles.len(), 2);
        assert!(!result.datafiles[0].sealed);
        assert!(result.datafiles[1].error.is_some());
    }
}
