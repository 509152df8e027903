//! Typed marker payloads.

use super::{MarkerHeader, MarkerType, DOCUMENT_BLOB_OFFSET, MARKER_HEADER_SIZE};
use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, DatabaseId, FileId, TransactionId};

/// A marker payload, decoded once after its type byte has been validated.
///
/// Blobs borrow from the mapped region; nothing is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerBody<'a> {
    /// Datafile header.
    Header {
        /// Format version.
        version: u32,
        /// Size the datafile was created with.
        maximal_size: u32,
        /// File ID.
        fid: FileId,
    },
    /// Datafile footer.
    Footer,
    /// Placeholder for a blanked-out marker.
    Blank,
    /// Collection header.
    CollectionHeader {
        /// Collection ID.
        collection_id: CollectionId,
    },
    /// Context switch for the markers that follow.
    Prologue {
        /// Database ID.
        database_id: DatabaseId,
        /// Collection ID.
        collection_id: CollectionId,
    },
    /// Document insert or update.
    Document {
        /// Owning transaction.
        transaction_id: TransactionId,
        /// Serialized document.
        blob: &'a [u8],
    },
    /// Document removal.
    Remove {
        /// Owning transaction.
        transaction_id: TransactionId,
        /// Serialized key.
        blob: &'a [u8],
    },
    /// Collection create, drop, rename or change.
    Collection {
        /// Which collection operation.
        marker_type: MarkerType,
        /// Database ID.
        database_id: DatabaseId,
        /// Collection ID.
        collection_id: CollectionId,
        /// Serialized properties.
        blob: &'a [u8],
    },
    /// Index create or drop.
    Index {
        /// Which index operation.
        marker_type: MarkerType,
        /// Database ID.
        database_id: DatabaseId,
        /// Collection ID.
        collection_id: CollectionId,
        /// Serialized definition.
        blob: &'a [u8],
    },
    /// Database create or drop.
    Database {
        /// Which database operation.
        marker_type: MarkerType,
        /// Database ID.
        database_id: DatabaseId,
        /// Serialized properties.
        blob: &'a [u8],
    },
    /// Transaction begin, commit or abort.
    Transaction {
        /// Which transaction event.
        marker_type: MarkerType,
        /// Database ID.
        database_id: DatabaseId,
        /// Transaction ID.
        transaction_id: TransactionId,
    },
}

impl<'a> MarkerBody<'a> {
    /// Decodes a complete marker (header included).
    ///
    /// # Errors
    ///
    /// Returns `CorruptedDatafile` if the type is unknown or the marker is
    /// too short for its type.
    pub fn decode(marker: &'a [u8]) -> CoreResult<Self> {
        let header = MarkerHeader::parse(marker)
            .ok_or_else(|| CoreError::corrupted("marker shorter than its header"))?;
        let marker_type = header.marker_type().ok_or_else(|| {
            CoreError::corrupted(format!("unknown marker type {}", header.type_byte))
        })?;
        let r = Reader {
            bytes: marker,
            marker_type,
        };

        let body = match marker_type {
            MarkerType::Header => Self::Header {
                version: r.u32_at(16)?,
                maximal_size: r.u32_at(20)?,
                fid: FileId(r.u64_at(24)?),
            },
            MarkerType::Footer => Self::Footer,
            MarkerType::Blank => Self::Blank,
            MarkerType::CollectionHeader => Self::CollectionHeader {
                collection_id: CollectionId(r.u64_at(16)?),
            },
            MarkerType::Prologue => Self::Prologue {
                database_id: DatabaseId(r.u64_at(16)?),
                collection_id: CollectionId(r.u64_at(24)?),
            },
            MarkerType::Document => Self::Document {
                transaction_id: TransactionId(r.u64_at(16)?),
                blob: r.tail(DOCUMENT_BLOB_OFFSET)?,
            },
            MarkerType::Remove => Self::Remove {
                transaction_id: TransactionId(r.u64_at(16)?),
                blob: r.tail(DOCUMENT_BLOB_OFFSET)?,
            },
            MarkerType::CreateCollection
            | MarkerType::DropCollection
            | MarkerType::RenameCollection
            | MarkerType::ChangeCollection => Self::Collection {
                marker_type,
                database_id: DatabaseId(r.u64_at(16)?),
                collection_id: CollectionId(r.u64_at(24)?),
                blob: r.tail(32)?,
            },
            MarkerType::CreateIndex | MarkerType::DropIndex => Self::Index {
                marker_type,
                database_id: DatabaseId(r.u64_at(16)?),
                collection_id: CollectionId(r.u64_at(24)?),
                blob: r.tail(32)?,
            },
            MarkerType::CreateDatabase | MarkerType::DropDatabase => Self::Database {
                marker_type,
                database_id: DatabaseId(r.u64_at(16)?),
                blob: r.tail(24)?,
            },
            MarkerType::BeginTransaction
            | MarkerType::CommitTransaction
            | MarkerType::AbortTransaction => Self::Transaction {
                marker_type,
                database_id: DatabaseId(r.u64_at(16)?),
                transaction_id: TransactionId(r.u64_at(24)?),
            },
        };
        Ok(body)
    }

    /// Returns the database a marker refers to, if any.
    #[must_use]
    pub fn database_id(&self) -> Option<DatabaseId> {
        match self {
            Self::Prologue { database_id, .. }
            | Self::Collection { database_id, .. }
            | Self::Index { database_id, .. }
            | Self::Database { database_id, .. }
            | Self::Transaction { database_id, .. } => Some(*database_id),
            _ => None,
        }
    }

    /// Returns the opaque blob carried by the marker, if any.
    #[must_use]
    pub fn blob(&self) -> Option<&'a [u8]> {
        match self {
            Self::Document { blob, .. }
            | Self::Remove { blob, .. }
            | Self::Collection { blob, .. }
            | Self::Index { blob, .. }
            | Self::Database { blob, .. } => Some(blob),
            _ => None,
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    marker_type: MarkerType,
}

impl<'a> Reader<'a> {
    fn short(&self, needed: usize) -> CoreError {
        CoreError::corrupted(format!(
            "{} marker of {} bytes is too short, need at least {needed}",
            self.marker_type.name(),
            self.bytes.len()
        ))
    }

    fn u32_at(&self, offset: usize) -> CoreResult<u32> {
        self.bytes
            .get(offset..offset + 4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or_else(|| self.short(offset + 4))
    }

    fn u64_at(&self, offset: usize) -> CoreResult<u64> {
        self.bytes
            .get(offset..offset + 8)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
            .ok_or_else(|| self.short(offset + 8))
    }

    fn tail(&self, offset: usize) -> CoreResult<&'a [u8]> {
        debug_assert!(offset >= MARKER_HEADER_SIZE);
        self.bytes.get(offset..).ok_or_else(|| self.short(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::MarkerBuf;

    #[test]
    fn decode_header() {
        let marker = MarkerBuf::header(65536, FileId::new(12));
        let body = MarkerBody::decode(marker.as_bytes()).unwrap();
        assert_eq!(
            body,
            MarkerBody::Header {
                version: 2,
                maximal_size: 65536,
                fid: FileId::new(12),
            }
        );
    }

    #[test]
    fn decode_document_blob() {
        let marker = MarkerBuf::document(TransactionId::new(5), b"{\"a\":1}");
        match MarkerBody::decode(marker.as_bytes()).unwrap() {
            MarkerBody::Document {
                transaction_id,
                blob,
            } => {
                assert_eq!(transaction_id, TransactionId::new(5));
                assert_eq!(blob, b"{\"a\":1}");
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn decode_transaction_and_prologue() {
        let marker = MarkerBuf::transaction(
            MarkerType::CommitTransaction,
            DatabaseId::new(1),
            TransactionId::new(99),
        );
        let body = MarkerBody::decode(marker.as_bytes()).unwrap();
        assert_eq!(body.database_id(), Some(DatabaseId::new(1)));
        assert!(body.blob().is_none());

        let marker = MarkerBuf::prologue(DatabaseId::new(3), CollectionId::new(4));
        assert_eq!(
            MarkerBody::decode(marker.as_bytes()).unwrap(),
            MarkerBody::Prologue {
                database_id: DatabaseId::new(3),
                collection_id: CollectionId::new(4),
            }
        );
    }

    #[test]
    fn decode_rejects_short_and_unknown() {
        let mut short = MarkerBuf::new(MarkerType::Prologue, 20);
        short.set_tick(1);
        assert!(MarkerBody::decode(short.as_bytes()).is_err());

        let mut unknown = MarkerBuf::footer().as_bytes().to_vec();
        unknown[15] = 99;
        assert!(matches!(
            MarkerBody::decode(&unknown),
            Err(CoreError::CorruptedDatafile { .. })
        ));
    }
}
