//! # Document Store Port
//!
//! Interface consumed from the replicated document-store collaborator:
//! durable per-document storage, unique create per id, versioned replace,
//! field-indexed queries, and time-based expiration. The store's replication
//! and consensus are outside this crate's concern; [`MemoryDocumentStore`]
//! stands in with explicit per-document-id write serialization so that "one
//! validated writer at a time per document" holds without a replicated
//! backend.

pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

pub use memory::MemoryDocumentStore;

/// Epoch microseconds now, the time base for document expiration.
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// A stored document record: JSON body plus store-owned metadata.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    /// Document kind, the query namespace (e.g. `entity-locks`).
    pub kind: String,
    pub body: Value,
    /// Monotonic per-document version, starts at 1.
    pub version: u64,
    /// Epoch micros after which the document is treated as absent.
    /// Non-positive means the document never expires.
    pub expiration_time_micros: i64,
}

impl StoredDocument {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            body,
            version: 0,
            expiration_time_micros: 0,
        }
    }

    pub fn with_expiration(mut self, expiration_time_micros: i64) -> Self {
        self.expiration_time_micros = expiration_time_micros;
        self
    }
}

/// Equality predicate on a top-level body field.
#[derive(Debug, Clone)]
pub struct FieldEquals {
    pub field: String,
    pub value: Value,
}

impl FieldEquals {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Operations the engine consumes from the document store.
///
/// Mutation is all-or-nothing per document: a rejected create or update
/// leaves the stored record untouched.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Persist a new document. Exactly one create succeeds per id; a
    /// concurrent create of the same id observes `StateConflict`. This is
    /// the atomicity primitive entity locks are built on.
    async fn create(&self, doc: StoredDocument) -> Result<StoredDocument>;

    /// Fetch by id. Expired documents are reported as `NotFound`.
    async fn get(&self, id: &str) -> Result<StoredDocument>;

    /// Replace the body if the stored version matches `expected_version`;
    /// a lost race yields `StateConflict` and the caller must refetch.
    async fn update(&self, id: &str, expected_version: u64, body: Value)
        -> Result<StoredDocument>;

    /// Page of documents of `kind` matching all `predicates`, in creation
    /// order, at most `page_limit` records.
    async fn query(
        &self,
        kind: &str,
        predicates: &[FieldEquals],
        page_limit: usize,
    ) -> Result<Vec<StoredDocument>>;

    /// Delete by id; `NotFound` if absent.
    async fn delete(&self, id: &str) -> Result<()>;
}
