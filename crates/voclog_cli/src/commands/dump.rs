//! Dump command implementation.

use crate::Format;
use serde::Serialize;
use std::path::Path;
use voclog_core::{Datafile, Marker, MarkerBody};

/// A marker as printed by `dump`.
#[derive(Debug, Serialize)]
pub struct MarkerInfo {
    /// Offset in the datafile.
    pub position: usize,
    /// Marker size in bytes.
    pub size: usize,
    /// Marker type name.
    pub marker_type: String,
    /// Marker tick.
    pub tick: u64,
    /// Whether the stored CRC matches.
    pub crc_ok: bool,
    /// Database ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_id: Option<u64>,
    /// Collection ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<u64>,
    /// Transaction ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<u64>,
    /// Blob size in bytes (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_size: Option<usize>,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    offset: usize,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let markers = read_markers(path, limit, offset)?;

    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&markers)?);
        }
        Format::Text => {
            print_text_output(&markers);
        }
    }

    Ok(())
}

/// Reads up to `limit` markers starting at `offset`.
pub fn read_markers(
    path: &Path,
    limit: Option<usize>,
    offset: usize,
) -> Result<Vec<MarkerInfo>, Box<dyn std::error::Error>> {
    let (datafile, report) = Datafile::open_read_only(path)?;
    if let Some(diagnosis) = report.diagnosis.filter(|_| !report.ok) {
        eprintln!("warning: markers end early: {diagnosis}");
    }

    let limit = limit.unwrap_or(usize::MAX);
    let mut markers = Vec::new();
    datafile.iterate(|marker| {
        if marker.position() < offset {
            return true;
        }
        markers.push(describe(marker));
        markers.len() < limit
    })?;
    Ok(markers)
}

fn describe(marker: &Marker<'_>) -> MarkerInfo {
    let mut info = MarkerInfo {
        position: marker.position(),
        size: marker.size(),
        marker_type: marker
            .marker_type()
            .map_or_else(|| "unknown".to_string(), |t| t.name().to_string()),
        tick: marker.tick(),
        crc_ok: marker.crc_matches(),
        database_id: None,
        collection_id: None,
        transaction_id: None,
        blob_size: None,
    };

    let Ok(body) = marker.body() else {
        return info;
    };
    info.database_id = body.database_id().map(|id| id.as_u64());
    info.blob_size = body.blob().map(<[u8]>::len);
    match body {
        MarkerBody::Prologue { collection_id, .. }
        | MarkerBody::CollectionHeader { collection_id }
        | MarkerBody::Collection { collection_id, .. }
        | MarkerBody::Index { collection_id, .. } => {
            info.collection_id = Some(collection_id.as_u64());
        }
        MarkerBody::Document { transaction_id, .. }
        | MarkerBody::Remove { transaction_id, .. }
        | MarkerBody::Transaction { transaction_id, .. } => {
            info.transaction_id = Some(transaction_id.as_u64());
        }
        MarkerBody::Header { .. }
        | MarkerBody::Footer
        | MarkerBody::Blank
        | MarkerBody::Database { .. } => {}
    }
    info
}

fn print_text_output(markers: &[MarkerInfo]) {
    println!(
        "{:>10}  {:>8}  {:<20}  {:>12}  {:<3}  details",
        "position", "size", "type", "tick", "crc"
    );
    for m in markers {
        let mut details = Vec::new();
        if let Some(id) = m.database_id {
            details.push(format!("db={id}"));
        }
        if let Some(id) = m.collection_id {
            details.push(format!("cid={id}"));
        }
        if let Some(id) = m.transaction_id {
            details.push(format!("tid={id}"));
        }
        if let Some(size) = m.blob_size {
            details.push(format!("blob={size}"));
        }
        println!(
            "{:>10}  {:>8}  {:<20}  {:>12}  {:<3}  {}",
            m.position,
            m.size,
            m.marker_type,
            m.tick,
            if m.crc_ok { "ok" } else { "BAD" },
            details.join(" ")
        );
    }
    println!();
    println!("{} markers", markers.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::write_datafile;
    use voclog_core::MarkerType;

    #[test]
    fn dump_reads_markers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logfile-1.db");
        let positions = write_datafile(&path, 3, true);

        let markers = read_markers(&path, None, 0).unwrap();
        let types: Vec<_> = markers.iter().map(|m| m.marker_type.as_str()).collect();
        assert_eq!(types.len(), 5);
        assert_eq!(types[0], MarkerType::Header.name());
        assert_eq!(types[1], MarkerType::Document.name());
        assert_eq!(types[4], MarkerType::Footer.name());
        assert!(markers.iter().all(|m| m.crc_ok));
        assert_eq!(markers[1].position, positions[0]);
        assert_eq!(markers[1].transaction_id, Some(1));
        assert_eq!(markers[1].blob_size, Some(40));

        let tail = read_markers(&path, Some(1), positions[1]).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].position, positions[1]);
    }
}
