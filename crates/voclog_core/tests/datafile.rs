//! Datafile format tests against real files.

use proptest::prelude::*;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use tempfile::tempdir;
use voclog_core::datafile::ScanFix;
use voclog_core::marker::{aligned_size, check_crc, HEADER_MARKER_SIZE, MARKER_HEADER_SIZE};
use voclog_core::{
    CoreError, Datafile, DatafileState, FileId, MarkerBody, MarkerBuf, MarkerType, TickServer,
    TransactionId,
};

const KB64: usize = 64 * 1024;

/// A document marker of exactly `size` bytes.
fn document(size: usize, fill: u8) -> MarkerBuf {
    MarkerBuf::document(TransactionId::new(7), &vec![fill; size - 24])
}

#[test]
fn sixty_four_kib_datafile_lifecycle() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("datafile-1.db");
    let ticks = TickServer::new(100);

    let mut df = Datafile::create(Some(&path), FileId::new(1), KB64, true).unwrap();
    assert_eq!(df.current_size(), aligned_size(HEADER_MARKER_SIZE));

    for i in 0..10u8 {
        let mut marker = document(100, i);
        let position = df.reserve(marker.size(), 0).unwrap();
        df.write_with_crc(position, &mut marker, &ticks, false)
            .unwrap();
    }
    assert_eq!(
        df.current_size(),
        aligned_size(HEADER_MARKER_SIZE) + 10 * 104
    );

    df.seal().unwrap();
    assert!(df.is_sealed());
    assert_eq!(df.maximal_size(), df.current_size());
    drop(df);

    let df = Datafile::open(&path, false).unwrap();
    assert!(df.is_sealed());
    let mut seen = Vec::new();
    df.iterate(|marker| {
        seen.push(marker.marker_type().unwrap());
        true
    })
    .unwrap();
    assert_eq!(seen.len(), 12);
    assert_eq!(seen[0], MarkerType::Header);
    assert!(seen[1..11].iter().all(|t| *t == MarkerType::Document));
    assert_eq!(seen[11], MarkerType::Footer);
}

#[test]
fn second_seal_changes_nothing() {
    let mut df = Datafile::create(None, FileId::new(1), KB64, true).unwrap();
    df.seal().unwrap();
    let (current, maximal) = (df.current_size(), df.maximal_size());
    assert!(matches!(df.seal(), Err(CoreError::AlreadySealed)));
    assert_eq!(df.current_size(), current);
    assert_eq!(df.maximal_size(), maximal);
}

#[test]
fn torn_tail_is_cut_off_in_repair_mode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("datafile-2.db");
    let ticks = TickServer::new(0);
    let positions = {
        let df = Datafile::create(Some(&path), FileId::new(2), KB64, true).unwrap();
        let positions = write_all(&df, &[vec![1; 76], vec![2; 76], vec![3; 76]], &ticks);
        df.sync().unwrap();
        positions
    };

    // a crash after the header of the last marker reached the disk
    let torn = positions[2];
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start((torn + MARKER_HEADER_SIZE) as u64))
        .unwrap();
    file.write_all(&[0u8; 100 - MARKER_HEADER_SIZE]).unwrap();
    file.sync_all().unwrap();
    drop(file);

    let (df, report) = Datafile::open_with_report(&path, true).unwrap();
    assert!(report.ok);
    assert_eq!(report.fixes, vec![ScanFix::TornTail { position: torn }]);
    assert_eq!(df.current_size(), torn);
    assert_eq!(df.state(), DatafileState::Write);
    assert_eq!(df.tick_max(), 2);

    // the next marker takes the torn marker's place
    let mut marker = document(100, 9);
    let position = df.reserve(marker.size(), 0).unwrap();
    assert_eq!(position, torn);
    df.write_with_crc(position, &mut marker, &ticks, false)
        .unwrap();
    df.sync().unwrap();
    drop(df);

    let df = Datafile::open(&path, false).unwrap();
    let mut fills = Vec::new();
    df.iterate(|marker| {
        if let Ok(MarkerBody::Document { blob, .. }) = marker.body() {
            fills.push(blob[0]);
        }
        true
    })
    .unwrap();
    assert_eq!(fills, vec![1, 2, 9]);
}

fn write_all(df: &Datafile, payloads: &[Vec<u8>], ticks: &TickServer) -> Vec<usize> {
    let mut positions = Vec::new();
    for payload in payloads {
        let mut marker = MarkerBuf::document(TransactionId::new(3), payload);
        let position = df.reserve(marker.size(), 0).unwrap();
        df.write_with_crc(position, &mut marker, ticks, false)
            .unwrap();
        positions.push(position);
    }
    positions
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn written_markers_read_back(payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..20)) {
        let dir = tempdir().unwrap();
        let ticks = TickServer::new(0);
        let df = Datafile::create(Some(&dir.path().join("d.db")), FileId::new(1), KB64, true).unwrap();
        let positions = write_all(&df, &payloads, &ticks);

        let mut seen = Vec::new();
        df.iterate(|marker| {
            if marker.marker_type() == Some(MarkerType::Document) {
                let blob = match marker.body() {
                    Ok(MarkerBody::Document { blob, .. }) => blob.to_vec(),
                    _ => Vec::new(),
                };
                seen.push((marker.position(), marker.tick(), blob));
            }
            true
        }).unwrap();

        prop_assert_eq!(seen.len(), payloads.len());
        for (i, (position, tick, blob)) in seen.iter().enumerate() {
            prop_assert_eq!(*position, positions[i]);
            prop_assert_eq!(*tick, i as u64 + 1);
            prop_assert_eq!(blob, &payloads[i]);
        }
        for (pair, payload) in positions.windows(2).zip(&payloads) {
            prop_assert_eq!(pair[1] - pair[0], aligned_size(24 + payload.len()));
        }
    }

    #[test]
    fn any_flipped_payload_bit_breaks_crc(len in 1usize..200, bit in 0usize..8, at in any::<prop::sample::Index>()) {
        // CRCs are only stamped into file-backed datafiles
        let dir = tempdir().unwrap();
        let ticks = TickServer::new(0);
        let df = Datafile::create(Some(&dir.path().join("d.db")), FileId::new(1), KB64, true).unwrap();
        let positions = write_all(&df, &[vec![0xA5; len]], &ticks);
        let start = positions[0];
        let size = 24 + len;

        let mut bytes = df.read(0, df.current_size()).unwrap().to_vec();
        prop_assert!(check_crc(&bytes, start));

        // anywhere after the crc field
        let offset = start + 8 + at.index(size - 8);
        bytes[offset] ^= 1 << bit;
        prop_assert!(!check_crc(&bytes, start));
    }
}
