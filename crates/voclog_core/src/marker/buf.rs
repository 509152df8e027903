//! Owned marker builder.

use super::{
    compute_crc, MarkerHeader, MarkerType, DATAFILE_VERSION, DOCUMENT_BLOB_OFFSET,
    FOOTER_MARKER_SIZE, HEADER_MARKER_SIZE, MARKER_HEADER_SIZE, PROLOGUE_MARKER_SIZE,
};
use crate::types::{CollectionId, DatabaseId, FileId, Tick, TransactionId, MAX_TICK};

/// A marker assembled in memory before it is copied into a datafile.
///
/// The buffer holds exactly `size` bytes; padding to the next 8-byte
/// boundary is provided by the zero-filled datafile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerBuf {
    bytes: Vec<u8>,
}

impl MarkerBuf {
    /// Creates a zero-filled marker of `size` bytes with tick and CRC zero.
    ///
    /// Sizes below the header size are raised to it.
    #[must_use]
    pub fn new(marker_type: MarkerType, size: usize) -> Self {
        let size = size.max(MARKER_HEADER_SIZE);
        let mut bytes = vec![0u8; size];
        let header = MarkerHeader {
            size: u32::try_from(size).unwrap_or(u32::MAX),
            crc: 0,
            type_byte: marker_type.as_byte(),
            tick: 0,
        };
        bytes[..MARKER_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        Self { bytes }
    }

    /// Creates a marker of the given type whose payload is `payload`.
    #[must_use]
    pub fn with_payload(marker_type: MarkerType, payload: &[u8]) -> Self {
        let mut marker = Self::new(marker_type, MARKER_HEADER_SIZE + payload.len());
        marker.bytes[MARKER_HEADER_SIZE..].copy_from_slice(payload);
        marker
    }

    /// Creates a datafile header marker.
    #[must_use]
    pub fn header(maximal_size: u32, fid: FileId) -> Self {
        let mut marker = Self::new(MarkerType::Header, HEADER_MARKER_SIZE);
        marker.put_u32(16, DATAFILE_VERSION);
        marker.put_u32(20, maximal_size);
        marker.put_u64(24, fid.as_u64());
        marker
    }

    /// Creates a datafile footer marker.
    #[must_use]
    pub fn footer() -> Self {
        Self::new(MarkerType::Footer, FOOTER_MARKER_SIZE)
    }

    /// Creates a blank marker of `size` bytes.
    #[must_use]
    pub fn blank(size: usize) -> Self {
        Self::new(MarkerType::Blank, size)
    }

    /// Creates a prologue marker.
    #[must_use]
    pub fn prologue(database_id: DatabaseId, collection_id: CollectionId) -> Self {
        let mut marker = Self::new(MarkerType::Prologue, PROLOGUE_MARKER_SIZE);
        marker.put_u64(16, database_id.as_u64());
        marker.put_u64(24, collection_id.as_u64());
        marker
    }

    /// Creates a collection header marker.
    #[must_use]
    pub fn collection_header(collection_id: CollectionId) -> Self {
        let mut marker = Self::new(MarkerType::CollectionHeader, 24);
        marker.put_u64(16, collection_id.as_u64());
        marker
    }

    /// Creates a document marker.
    #[must_use]
    pub fn document(transaction_id: TransactionId, blob: &[u8]) -> Self {
        Self::with_id_and_blob(MarkerType::Document, &[transaction_id.as_u64()], blob)
    }

    /// Creates a remove marker.
    #[must_use]
    pub fn remove(transaction_id: TransactionId, blob: &[u8]) -> Self {
        Self::with_id_and_blob(MarkerType::Remove, &[transaction_id.as_u64()], blob)
    }

    /// Creates a begin, commit or abort transaction marker.
    #[must_use]
    pub fn transaction(
        marker_type: MarkerType,
        database_id: DatabaseId,
        transaction_id: TransactionId,
    ) -> Self {
        Self::with_id_and_blob(
            marker_type,
            &[database_id.as_u64(), transaction_id.as_u64()],
            &[],
        )
    }

    /// Creates a collection operation marker.
    #[must_use]
    pub fn collection(
        marker_type: MarkerType,
        database_id: DatabaseId,
        collection_id: CollectionId,
        blob: &[u8],
    ) -> Self {
        Self::with_id_and_blob(
            marker_type,
            &[database_id.as_u64(), collection_id.as_u64()],
            blob,
        )
    }

    /// Creates an index operation marker.
    #[must_use]
    pub fn index(
        marker_type: MarkerType,
        database_id: DatabaseId,
        collection_id: CollectionId,
        blob: &[u8],
    ) -> Self {
        Self::collection(marker_type, database_id, collection_id, blob)
    }

    /// Creates a database operation marker.
    #[must_use]
    pub fn database(marker_type: MarkerType, database_id: DatabaseId, blob: &[u8]) -> Self {
        Self::with_id_and_blob(marker_type, &[database_id.as_u64()], blob)
    }

    fn with_id_and_blob(marker_type: MarkerType, ids: &[u64], blob: &[u8]) -> Self {
        let offset = MARKER_HEADER_SIZE + ids.len() * 8;
        debug_assert!(marker_type != MarkerType::Document || offset == DOCUMENT_BLOB_OFFSET);
        let mut marker = Self::new(marker_type, offset + blob.len());
        for (i, id) in ids.iter().enumerate() {
            marker.put_u64(MARKER_HEADER_SIZE + i * 8, *id);
        }
        marker.bytes[offset..].copy_from_slice(blob);
        marker
    }

    fn put_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u64(&mut self, offset: usize, value: u64) {
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn header_mut(&mut self, f: impl FnOnce(&mut MarkerHeader)) {
        if let Some(mut header) = MarkerHeader::parse(&self.bytes) {
            f(&mut header);
            self.bytes[..MARKER_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        }
    }

    /// Returns the decoded header.
    #[must_use]
    pub fn header_fields(&self) -> MarkerHeader {
        MarkerHeader::parse(&self.bytes).unwrap_or(MarkerHeader {
            size: 0,
            crc: 0,
            type_byte: 0,
            tick: 0,
        })
    }

    /// Marker size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// The marker type.
    #[must_use]
    pub fn marker_type(&self) -> Option<MarkerType> {
        self.header_fields().marker_type()
    }

    /// The marker tick (zero if none assigned yet).
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.header_fields().tick
    }

    /// Sets the tick. Only the low 56 bits are kept.
    pub fn set_tick(&mut self, tick: Tick) {
        self.header_mut(|h| h.tick = tick & MAX_TICK);
    }

    /// Computes the CRC and stores it in the header.
    pub fn finalize_crc(&mut self) -> u32 {
        let crc = compute_crc(&self.bytes);
        self.header_mut(|h| h.crc = crc);
        crc
    }

    /// The stored CRC.
    #[must_use]
    pub fn crc(&self) -> u32 {
        self.header_fields().crc
    }

    /// The encoded marker.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The payload after the header, for callers building custom layouts.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[MARKER_HEADER_SIZE..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_sets_header_only() {
        let marker = MarkerBuf::new(MarkerType::Document, 100);
        let header = marker.header_fields();
        assert_eq!(marker.size(), 100);
        assert_eq!(header.size, 100);
        assert_eq!(header.crc, 0);
        assert_eq!(header.tick, 0);
        assert_eq!(marker.marker_type(), Some(MarkerType::Document));
        assert!(marker.as_bytes()[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn small_sizes_are_raised() {
        assert_eq!(MarkerBuf::new(MarkerType::Blank, 3).size(), 16);
    }

    #[test]
    fn fixed_sizes() {
        assert_eq!(MarkerBuf::header(4096, FileId::new(1)).size(), 32);
        assert_eq!(MarkerBuf::footer().size(), 16);
        assert_eq!(
            MarkerBuf::prologue(DatabaseId::new(1), CollectionId::new(2)).size(),
            32
        );
        assert_eq!(MarkerBuf::document(TransactionId::new(1), &[0; 76]).size(), 100);
    }

    #[test]
    fn tick_is_masked() {
        let mut marker = MarkerBuf::footer();
        marker.set_tick(u64::MAX);
        assert_eq!(marker.tick(), MAX_TICK);
        assert_eq!(marker.marker_type(), Some(MarkerType::Footer));
    }

    #[test]
    fn finalize_is_stable() {
        let mut marker = MarkerBuf::document(TransactionId::new(1), b"abc");
        marker.set_tick(5);
        let crc = marker.finalize_crc();
        assert_eq!(marker.crc(), crc);
        assert_eq!(marker.finalize_crc(), crc);
    }
}
