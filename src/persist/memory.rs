//! Hash-map backed [`DocumentStore`], mainly for tests and embedding.

use std::cmp::Ordering;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering as AtomicOrdering},
};

use hashbrown::HashMap;
use serde_json::Value;

use crate::{action::ID_FIELD, types::RecordId};

use super::{
    BatchReport, Document, DocumentStore, Rejection, StoreError, StoreResult,
    filter::{Filter, Sort, SortOrder, compare_values, lookup},
};

/// Decision returned by an [`InsertPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertVerdict {
    /// Store the document.
    Accept,
    /// Refuse the document with a reason.
    Reject(String),
}

/// Per-document admission hook, called with the batch index.
pub type InsertPolicy = Box<dyn FnMut(usize, &Document) -> InsertVerdict + Send>;

/// In-memory store with optional failure injection.
pub struct MemoryStore {
    collections: HashMap<String, Vec<(RecordId, Document)>>,
    next_id: RecordId,
    policy: Option<InsertPolicy>,
    offline: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store; ids start at 1.
    pub fn new() -> Self {
        Self {
            collections: HashMap::new(),
            next_id: 1,
            policy: None,
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Installs an admission hook consulted for every inserted document.
    pub fn with_insert_policy(mut self, policy: InsertPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Switch that makes every request fail with [`StoreError::Unavailable`] while set.
    pub fn offline_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.offline)
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, Vec::len)
    }

    /// True when `collection` holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn insert_batch(&mut self, collection: &str, docs: &[Document]) -> StoreResult<BatchReport> {
        self.check_online()?;

        let mut report = BatchReport::default();
        let rows = self.collections.entry(collection.to_string()).or_default();
        for (index, doc) in docs.iter().enumerate() {
            let verdict = match self.policy.as_mut() {
                Some(policy) => policy(index, doc),
                None => InsertVerdict::Accept,
            };
            match verdict {
                InsertVerdict::Accept => {
                    let id = self.next_id;
                    self.next_id += 1;
                    let mut body = doc.clone();
                    body.remove(ID_FIELD);
                    rows.push((id, body));
                    report.inserted.push((index, id));
                }
                InsertVerdict::Reject(reason) => report.rejected.push(Rejection { index, reason }),
            }
        }
        Ok(report)
    }

    fn update_by_id(&mut self, collection: &str, id: RecordId, doc: &Document) -> StoreResult<()> {
        self.check_online()?;

        let row = self
            .collections
            .get_mut(collection)
            .and_then(|rows| rows.iter_mut().find(|(row_id, _)| *row_id == id))
            .ok_or(StoreError::NotFound(id))?;
        let mut body = doc.clone();
        body.remove(ID_FIELD);
        row.1 = body;
        Ok(())
    }

    fn find(&self, collection: &str, filter: &Filter, sort: Option<&Sort>) -> StoreResult<Vec<Document>> {
        self.check_online()?;

        let Some(rows) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<&(RecordId, Document)> =
            rows.iter().filter(|(_, doc)| filter.matches(doc)).collect();

        if let Some(sort) = sort {
            hits.sort_by(|(a_id, a), (b_id, b)| {
                let a_val = lookup(a, &sort.field).unwrap_or(&Value::Null);
                let b_val = lookup(b, &sort.field).unwrap_or(&Value::Null);
                let ord = compare_values(a_val, b_val)
                    .unwrap_or(Ordering::Equal)
                    .then(a_id.cmp(b_id));
                match sort.order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                }
            });
        }

        Ok(hits
            .into_iter()
            .map(|(id, doc)| {
                let mut out = doc.clone();
                out.insert(ID_FIELD.to_string(), Value::from(*id));
                out
            })
            .collect())
    }
}
