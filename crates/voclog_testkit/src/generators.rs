//! Property-based test generators using proptest.
//!
//! Provides strategies for markers that the WAL accepts.

use proptest::prelude::*;
use voclog_core::{
    CollectionId, DatabaseId, MarkerBuf, MarkerType, TransactionId, MAX_TICK,
};

/// Strategy for ticks a tick server can hand out.
pub fn tick_strategy() -> impl Strategy<Value = u64> {
    1..=MAX_TICK
}

/// Strategy for marker payloads (arbitrary bytes).
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..1024)
}

/// Strategy for small JSON documents, as the collections store them.
pub fn json_blob_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z_]{1,10}").expect("Invalid regex"),
        any::<i64>(),
        1..6,
    )
    .prop_map(|fields| serde_json::to_vec(&fields).expect("Failed to encode document"))
}

/// Database and collection a marker is appended for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerContext {
    /// Database ID
    pub database_id: DatabaseId,
    /// Collection ID
    pub collection_id: CollectionId,
}

/// Strategy for a small set of contexts, so consecutive markers share
/// one often enough to skip the prologue.
pub fn context_strategy() -> impl Strategy<Value = MarkerContext> {
    (1u64..3, 1u64..4).prop_map(|(db, cid)| MarkerContext {
        database_id: DatabaseId::new(db),
        collection_id: CollectionId::new(cid),
    })
}

/// A marker to append, kept in a form that can be rebuilt and compared.
#[derive(Debug, Clone)]
pub enum MarkerTemplate {
    /// Document with a JSON-ish blob.
    Document {
        /// Transaction ID
        transaction_id: u64,
        /// Payload
        blob: Vec<u8>,
    },
    /// Document removal.
    Remove {
        /// Transaction ID
        transaction_id: u64,
        /// Payload
        blob: Vec<u8>,
    },
    /// Transaction begin, commit or abort.
    Transaction {
        /// One of the three transaction types.
        marker_type: MarkerType,
        /// Transaction ID
        transaction_id: u64,
    },
}

impl MarkerTemplate {
    /// Builds the marker for appending from `context`.
    #[must_use]
    pub fn build(&self, context: MarkerContext) -> MarkerBuf {
        match self {
            Self::Document {
                transaction_id,
                blob,
            } => MarkerBuf::document(TransactionId::new(*transaction_id), blob),
            Self::Remove {
                transaction_id,
                blob,
            } => MarkerBuf::remove(TransactionId::new(*transaction_id), blob),
            Self::Transaction {
                marker_type,
                transaction_id,
            } => MarkerBuf::transaction(
                *marker_type,
                context.database_id,
                TransactionId::new(*transaction_id),
            ),
        }
    }

    /// The marker type this template builds.
    #[must_use]
    pub fn marker_type(&self) -> MarkerType {
        match self {
            Self::Document { .. } => MarkerType::Document,
            Self::Remove { .. } => MarkerType::Remove,
            Self::Transaction { marker_type, .. } => *marker_type,
        }
    }
}

/// Strategy for markers, weighted towards documents.
pub fn marker_strategy() -> impl Strategy<Value = MarkerTemplate> {
    let transaction_type = prop_oneof![
        Just(MarkerType::BeginTransaction),
        Just(MarkerType::CommitTransaction),
        Just(MarkerType::AbortTransaction),
    ];
    prop_oneof![
        4 => (any::<u64>(), payload_strategy())
            .prop_map(|(transaction_id, blob)| MarkerTemplate::Document { transaction_id, blob }),
        1 => (any::<u64>(), json_blob_strategy())
            .prop_map(|(transaction_id, blob)| MarkerTemplate::Remove { transaction_id, blob }),
        1 => (transaction_type, any::<u64>())
            .prop_map(|(marker_type, transaction_id)| MarkerTemplate::Transaction { marker_type, transaction_id }),
    ]
}

/// Strategy for a sequence of markers with their contexts.
pub fn marker_sequence_strategy(
    min: usize,
    max: usize,
) -> impl Strategy<Value = Vec<(MarkerContext, MarkerTemplate)>> {
    prop::collection::vec((context_strategy(), marker_strategy()), min..max)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
