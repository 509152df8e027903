//! Marker binary format.
//!
//! Every record in a datafile starts with a 16-byte header:
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ size u32 │ crc u32  │ type u8 (high) | tick u56   │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! All integers are little-endian. `size` counts the header and payload but
//! not the padding; markers start on 8-byte boundaries. A `size` of zero
//! marks the end of the data written so far.
//!
//! The CRC is CRC32-C over the whole marker with the CRC field taken as four
//! zero bytes.

mod body;
mod buf;

pub use body::MarkerBody;
pub use buf::MarkerBuf;

use crate::error::{CoreError, CoreResult};
use crate::types::{Tick, MAX_TICK};

/// Size of the fixed marker header.
pub const MARKER_HEADER_SIZE: usize = 16;

/// Markers of this size or larger are rejected as garbage.
pub const MAX_MARKER_SIZE: u32 = 256 * 1024 * 1024;

/// Datafile format version written into header markers.
pub const DATAFILE_VERSION: u32 = 2;

/// Size of a header marker (`version`, `maximal_size`, `fid`).
pub const HEADER_MARKER_SIZE: usize = 32;

/// Size of a footer marker.
pub const FOOTER_MARKER_SIZE: usize = 16;

/// Size of a prologue marker (`database_id`, `collection_id`).
pub const PROLOGUE_MARKER_SIZE: usize = 32;

/// Offset of the blob inside document and remove markers.
pub const DOCUMENT_BLOB_OFFSET: usize = 24;

/// Room every journal reserves for its header and footer.
pub const JOURNAL_OVERHEAD: usize =
    aligned_size(HEADER_MARKER_SIZE) + aligned_size(FOOTER_MARKER_SIZE);

/// Type bytes must lie strictly between these bounds.
pub const MARKER_TYPE_MIN: u8 = 9;
/// See [`MARKER_TYPE_MIN`].
pub const MARKER_TYPE_MAX: u8 = 100;

const CRC_OFFSET: usize = 4;

/// Rounds a marker size up to the next 8-byte boundary.
#[must_use]
pub const fn aligned_size(size: usize) -> usize {
    (size + 7) & !7
}

/// Type of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MarkerType {
    /// First marker of every datafile.
    Header = 10,
    /// Last marker of a sealed datafile.
    Footer = 11,
    /// Placeholder replacing a corrupt marker of the same size.
    Blank = 12,
    /// Collection header in collection datafiles.
    CollectionHeader = 20,
    /// Database and collection context for the markers that follow.
    Prologue = 25,
    /// Document insert or update.
    Document = 30,
    /// Document removal.
    Remove = 31,
    /// Collection created.
    CreateCollection = 40,
    /// Collection dropped.
    DropCollection = 41,
    /// Collection renamed.
    RenameCollection = 42,
    /// Collection properties changed.
    ChangeCollection = 43,
    /// Index created.
    CreateIndex = 50,
    /// Index dropped.
    DropIndex = 51,
    /// Database created.
    CreateDatabase = 60,
    /// Database dropped.
    DropDatabase = 61,
    /// Transaction started.
    BeginTransaction = 70,
    /// Transaction committed.
    CommitTransaction = 71,
    /// Transaction aborted.
    AbortTransaction = 72,
}

impl MarkerType {
    /// Converts a byte to a marker type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            10 => Some(Self::Header),
            11 => Some(Self::Footer),
            12 => Some(Self::Blank),
            20 => Some(Self::CollectionHeader),
            25 => Some(Self::Prologue),
            30 => Some(Self::Document),
            31 => Some(Self::Remove),
            40 => Some(Self::CreateCollection),
            41 => Some(Self::DropCollection),
            42 => Some(Self::RenameCollection),
            43 => Some(Self::ChangeCollection),
            50 => Some(Self::CreateIndex),
            51 => Some(Self::DropIndex),
            60 => Some(Self::CreateDatabase),
            61 => Some(Self::DropDatabase),
            70 => Some(Self::BeginTransaction),
            71 => Some(Self::CommitTransaction),
            72 => Some(Self::AbortTransaction),
            _ => None,
        }
    }

    /// Converts the marker type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns `true` for header and footer markers, which carry no data
    /// and do not count towards tick bounds.
    #[must_use]
    pub const fn is_bookkeeping(self) -> bool {
        matches!(self, Self::Header | Self::Footer)
    }

    /// Returns `true` for document and remove markers.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Document | Self::Remove)
    }

    /// Returns a short lowercase name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Footer => "footer",
            Self::Blank => "blank",
            Self::CollectionHeader => "collection-header",
            Self::Prologue => "prologue",
            Self::Document => "document",
            Self::Remove => "remove",
            Self::CreateCollection => "create-collection",
            Self::DropCollection => "drop-collection",
            Self::RenameCollection => "rename-collection",
            Self::ChangeCollection => "change-collection",
            Self::CreateIndex => "create-index",
            Self::DropIndex => "drop-index",
            Self::CreateDatabase => "create-database",
            Self::DropDatabase => "drop-database",
            Self::BeginTransaction => "begin-transaction",
            Self::CommitTransaction => "commit-transaction",
            Self::AbortTransaction => "abort-transaction",
        }
    }
}

/// Returns `true` if `type_byte` lies strictly between the type bounds.
#[must_use]
pub const fn is_valid_type(type_byte: u8) -> bool {
    type_byte > MARKER_TYPE_MIN && type_byte < MARKER_TYPE_MAX
}

/// Packs a type byte and a tick into the 8-byte header field.
#[must_use]
pub const fn pack_type_and_tick(type_byte: u8, tick: Tick) -> u64 {
    ((type_byte as u64) << 56) | (tick & MAX_TICK)
}

/// Decoded marker header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerHeader {
    /// Marker length including the header, without padding.
    pub size: u32,
    /// Stored CRC.
    pub crc: u32,
    /// Raw type byte.
    pub type_byte: u8,
    /// Tick (56 bits).
    pub tick: Tick,
}

impl MarkerHeader {
    /// Parses the header at the start of `bytes`.
    ///
    /// Returns `None` if fewer than 16 bytes are available.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw: &[u8; MARKER_HEADER_SIZE] = bytes.get(..MARKER_HEADER_SIZE)?.try_into().ok()?;
        let size = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let crc = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let packed = u64::from_le_bytes([
            raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15],
        ]);
        Some(Self {
            size,
            crc,
            type_byte: (packed >> 56) as u8,
            tick: packed & MAX_TICK,
        })
    }

    /// Encodes the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; MARKER_HEADER_SIZE] {
        let mut out = [0u8; MARKER_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.size.to_le_bytes());
        out[4..8].copy_from_slice(&self.crc.to_le_bytes());
        out[8..16].copy_from_slice(&pack_type_and_tick(self.type_byte, self.tick).to_le_bytes());
        out
    }

    /// Returns the marker type, if the type byte is known.
    #[must_use]
    pub fn marker_type(&self) -> Option<MarkerType> {
        MarkerType::from_byte(self.type_byte)
    }

    /// Plausibility check independent of the CRC.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_type(self.type_byte) && self.size < MAX_MARKER_SIZE
    }

    /// Returns the on-disk footprint of the marker.
    #[must_use]
    pub fn aligned_size(&self) -> usize {
        aligned_size(self.size as usize)
    }
}

/// Computes the CRC of a complete marker (`marker.len()` must equal its size).
#[must_use]
pub fn compute_crc(marker: &[u8]) -> u32 {
    if marker.len() < MARKER_HEADER_SIZE {
        return crc32c::crc32c(marker);
    }
    let crc = crc32c::crc32c(&marker[..CRC_OFFSET]);
    let crc = crc32c::crc32c_append(crc, &[0u8; 4]);
    crc32c::crc32c_append(crc, &marker[CRC_OFFSET + 4..])
}

/// Returns `(stored, computed)` CRCs for the marker at `position`, or `None`
/// if the marker is shorter than a header or runs past the end of `region`.
#[must_use]
pub fn crc_pair(region: &[u8], position: usize) -> Option<(u32, u32)> {
    let header = MarkerHeader::parse(region.get(position..)?)?;
    let size = header.size as usize;
    if size < MARKER_HEADER_SIZE {
        return None;
    }
    let marker = region.get(position..position.checked_add(size)?)?;
    Some((header.crc, compute_crc(marker)))
}

/// Verifies the CRC of the marker at `position`.
///
/// The end of `region` is the end of the mapping: a marker claiming to
/// extend past it fails the check instead of reading out of bounds.
#[must_use]
pub fn check_crc(region: &[u8], position: usize) -> bool {
    matches!(crc_pair(region, position), Some((stored, computed)) if stored == computed)
}

/// A bounds-checked view of one marker inside a mapped region.
#[derive(Debug, Clone, Copy)]
pub struct Marker<'a> {
    position: usize,
    header: MarkerHeader,
    bytes: &'a [u8],
}

impl<'a> Marker<'a> {
    /// Reads the marker starting at `position`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedDatafile` if the header does not fit, the size is
    /// below the header size, or the marker extends past `region`.
    pub fn read(region: &'a [u8], position: usize) -> CoreResult<Self> {
        let header = region
            .get(position..)
            .and_then(MarkerHeader::parse)
            .ok_or_else(|| CoreError::corrupted(format!("truncated marker header at {position}")))?;
        let size = header.size as usize;
        if size < MARKER_HEADER_SIZE {
            return Err(CoreError::corrupted(format!(
                "marker at {position} has size {size}, below header size"
            )));
        }
        let bytes = position
            .checked_add(size)
            .and_then(|end| region.get(position..end))
            .ok_or_else(|| {
                CoreError::corrupted(format!(
                    "marker at {position} of size {size} extends past end of region ({})",
                    region.len()
                ))
            })?;
        Ok(Self {
            position,
            header,
            bytes,
        })
    }

    /// Offset of the marker in its datafile.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// The decoded header.
    #[must_use]
    pub fn header(&self) -> &MarkerHeader {
        &self.header
    }

    /// Marker size without padding.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// The marker's tick.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.header.tick
    }

    /// The marker type, if known.
    #[must_use]
    pub fn marker_type(&self) -> Option<MarkerType> {
        self.header.marker_type()
    }

    /// All bytes of the marker, header included.
    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// The bytes after the header.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[MARKER_HEADER_SIZE..]
    }

    /// Recomputes the CRC and compares it with the stored one.
    #[must_use]
    pub fn crc_matches(&self) -> bool {
        compute_crc(self.bytes) == self.header.crc
    }

    /// Decodes the typed body.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedDatafile` for unknown types or short payloads.
    pub fn body(&self) -> CoreResult<MarkerBody<'a>> {
        MarkerBody::decode(self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn marker_type_roundtrip() {
        for b in 0..=255u8 {
            if let Some(t) = MarkerType::from_byte(b) {
                assert_eq!(t.as_byte(), b);
                assert!(is_valid_type(b));
            }
        }
        assert!(MarkerType::from_byte(99).is_none());
        assert!(is_valid_type(99));
        assert!(!is_valid_type(9));
        assert!(!is_valid_type(100));
        assert!(!is_valid_type(0));
    }

    #[test]
    fn journal_overhead() {
        assert_eq!(JOURNAL_OVERHEAD, 48);
        assert_eq!(aligned_size(100), 104);
        assert_eq!(aligned_size(104), 104);
        assert_eq!(aligned_size(0), 0);
    }

    #[test]
    fn header_layout() {
        let header = MarkerHeader {
            size: 0x20,
            crc: 0xAABB_CCDD,
            type_byte: MarkerType::Document.as_byte(),
            tick: 0x0001_0203_0405_0607,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0x20, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(bytes[15], 30);
        assert_eq!(MarkerHeader::parse(&bytes), Some(header));
    }

    #[test]
    fn parse_short_input() {
        assert!(MarkerHeader::parse(&[0u8; 15]).is_none());
    }

    #[test]
    fn crc_ignores_crc_field() {
        let mut marker = MarkerBuf::document(crate::types::TransactionId::new(3), b"payload");
        marker.set_tick(77);
        let before = compute_crc(marker.as_bytes());
        marker.finalize_crc();
        assert_eq!(compute_crc(marker.as_bytes()), before);
        assert!(check_crc(marker.as_bytes(), 0));
    }

    #[test]
    fn check_crc_bounds() {
        let mut marker = MarkerBuf::footer();
        marker.finalize_crc();
        let bytes = marker.as_bytes();
        assert!(check_crc(bytes, 0));
        // mapping ends before the marker does
        assert!(!check_crc(&bytes[..12], 0));

        // size field below header size
        let mut bad = bytes.to_vec();
        bad[0] = 8;
        assert!(!check_crc(&bad, 0));
    }

    #[test]
    fn marker_view_rejects_overlong_size() {
        let mut bytes = MarkerBuf::footer().as_bytes().to_vec();
        bytes[0..4].copy_from_slice(&1024u32.to_le_bytes());
        assert!(matches!(
            Marker::read(&bytes, 0),
            Err(CoreError::CorruptedDatafile { .. })
        ));
    }

    #[test]
    fn validity() {
        let ok = MarkerHeader {
            size: 64,
            crc: 0,
            type_byte: 30,
            tick: 1,
        };
        assert!(ok.is_valid());
        assert!(!MarkerHeader { type_byte: 0, ..ok }.is_valid());
        assert!(!MarkerHeader {
            size: MAX_MARKER_SIZE,
            ..ok
        }
        .is_valid());
    }

    proptest! {
        #[test]
        fn any_payload_bit_flip_breaks_crc(
            blob in proptest::collection::vec(any::<u8>(), 1..512),
            bit in any::<prop::sample::Index>(),
        ) {
            let mut marker = MarkerBuf::document(crate::types::TransactionId::new(1), &blob);
            marker.set_tick(42);
            marker.finalize_crc();
            let mut bytes = marker.as_bytes().to_vec();

            // any bit outside the crc field
            let candidates = (bytes.len() - 4) * 8;
            let mut pos = bit.index(candidates);
            if pos >= CRC_OFFSET * 8 {
                pos += 32;
            }
            bytes[pos / 8] ^= 1 << (pos % 8);

            prop_assert!(!check_crc(&bytes, 0));
        }

        #[test]
        fn aligned_size_properties(size in 0usize..1_000_000) {
            let a = aligned_size(size);
            prop_assert_eq!(a % 8, 0);
            prop_assert!(a >= size);
            prop_assert!(a - size < 8);
        }
    }
}
