//! In-memory document store with explicit per-document-id write
//! serialization. Each id maps to one record guarded by the map's entry
//! locking, so all races on one document resolve to "one write wins, the
//! other observes a conflict", the same contract the replicated store's
//! single-owner write serialization provides.

use super::{now_micros, DocumentStore, FieldEquals, StoredDocument};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Record {
    kind: String,
    body: Value,
    version: u64,
    expiration_time_micros: i64,
}

impl Record {
    fn is_expired(&self, now_micros: i64) -> bool {
        self.expiration_time_micros > 0 && self.expiration_time_micros <= now_micros
    }

    fn to_stored(&self, id: &str) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            kind: self.kind.clone(),
            body: self.body.clone(),
            version: self.version,
            expiration_time_micros: self.expiration_time_micros,
        }
    }
}

/// In-memory [`DocumentStore`] used where no replicated store is available
/// (tests, single-node tools).
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: DashMap<String, Record>,
    /// Creation order, for deterministic query pagination.
    order: Mutex<Vec<String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired document. Expiration is otherwise enforced lazily
    /// on access, mirroring the store collaborator's automatic removal.
    pub fn purge_expired(&self) -> usize {
        let now = now_micros();
        let before = self.docs.len();
        self.docs.retain(|_, record| !record.is_expired(now));
        let purged = before.saturating_sub(self.docs.len());
        if purged > 0 {
            let mut order = self.order.lock();
            order.retain(|id| self.docs.contains_key(id));
            debug!(purged, "purged expired documents");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, doc: StoredDocument) -> Result<StoredDocument> {
        let now = now_micros();
        let record = Record {
            kind: doc.kind.clone(),
            body: doc.body.clone(),
            version: 1,
            expiration_time_micros: doc.expiration_time_micros,
        };

        let newly_inserted = match self.docs.entry(doc.id.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Err(CoreError::state_conflict(
                        doc.id,
                        "document already exists",
                    ));
                }
                // Expired records are replaceable as if absent.
                occupied.insert(record.clone());
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
                true
            }
        };
        if newly_inserted {
            // Entry guard is dropped before taking the order lock.
            self.order.lock().push(doc.id.clone());
        }

        trace!(id = %doc.id, kind = %doc.kind, "document created");
        Ok(record.to_stored(&doc.id))
    }

    async fn get(&self, id: &str) -> Result<StoredDocument> {
        let now = now_micros();
        match self.docs.get(id) {
            Some(record) if !record.is_expired(now) => Ok(record.to_stored(id)),
            _ => Err(CoreError::not_found(id)),
        }
    }

    async fn update(
        &self,
        id: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<StoredDocument> {
        let now = now_micros();
        let mut record = self
            .docs
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(id))?;

        if record.is_expired(now) {
            return Err(CoreError::not_found(id));
        }
        if record.version != expected_version {
            return Err(CoreError::state_conflict(
                id,
                format!(
                    "version {} does not match expected {expected_version}",
                    record.version
                ),
            ));
        }

        record.body = body;
        record.version += 1;
        trace!(id, version = record.version, "document updated");
        Ok(record.to_stored(id))
    }

    async fn query(
        &self,
        kind: &str,
        predicates: &[FieldEquals],
        page_limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        self.purge_expired();
        let order = self.order.lock().clone();

        let mut page = Vec::new();
        for id in order {
            if page.len() >= page_limit {
                break;
            }
            let Some(record) = self.docs.get(&id) else {
                continue;
            };
            if record.kind != kind {
                continue;
            }
            let matches = predicates
                .iter()
                .all(|p| record.body.get(&p.field) == Some(&p.value));
            if matches {
                page.push(record.to_stored(&id));
            }
        }
        Ok(page)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.docs.remove(id) {
            Some(_) => {
                self.order.lock().retain(|existing| existing != id);
                trace!(id, "document deleted");
                Ok(())
            }
            None => Err(CoreError::not_found(id)),
        }
    }
}
