//! Document-store abstraction with in-memory and SQLite implementations.

/// Filter and sort types.
pub mod filter;
/// In-memory document store.
pub mod memory;
/// `$match`/`$project`/`$group` pipeline stages and executor.
pub mod pipeline;
/// SQLite-backed document store.
pub mod sqlite;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::RecordId;

use self::{
    filter::{Filter, Sort},
    pipeline::Stage,
};

/// A stored JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Failure raised by a [`DocumentStore`] for a whole request.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite rejected the request.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// No document has this identity.
    #[error("no document with id {0}")]
    NotFound(RecordId),
    /// The store cannot be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Any other failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One document refused by a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Position of the document in the submitted batch.
    pub index: usize,
    /// Store-provided reason.
    pub reason: String,
}

/// Per-document outcome of a bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// `(batch index, assigned id)` for every accepted document.
    pub inserted: Vec<(usize, RecordId)>,
    /// Documents the store refused.
    pub rejected: Vec<Rejection>,
}

impl BatchReport {
    /// True when no document was refused.
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Abstract document store required by the logger.
///
/// Implementations are synchronous; async callers reach them through
/// [`SharedStore`] and `spawn_blocking`.
pub trait DocumentStore: Send {
    /// Inserts `docs` as one unordered bulk request. `Err` means nothing
    /// was written; per-document refusals are reported in the [`BatchReport`].
    fn insert_batch(&mut self, collection: &str, docs: &[Document]) -> StoreResult<BatchReport>;

    /// Replaces the body of the document with identity `id`.
    fn update_by_id(&mut self, collection: &str, id: RecordId, doc: &Document) -> StoreResult<()>;

    /// Returns matching documents, each carrying its `_id`, in `sort` order
    /// (insertion order when `None`).
    fn find(&self, collection: &str, filter: &Filter, sort: Option<&Sort>) -> StoreResult<Vec<Document>>;

    /// Runs an aggregation pipeline. A leading `$match` is pushed down into
    /// [`DocumentStore::find`]; the remaining stages run in-process.
    fn aggregate(&self, collection: &str, stages: &[Stage]) -> StoreResult<Vec<Document>> {
        let (filter, rest) = pipeline::split_leading_match(stages);
        let docs = self.find(collection, &filter, None)?;
        Ok(pipeline::run(docs, rest))
    }
}

/// Store handle shared between the writer task and command handling.
pub type SharedStore = Arc<Mutex<Box<dyn DocumentStore>>>;

/// Wraps a store for sharing.
pub fn shared(store: impl DocumentStore + 'static) -> SharedStore {
    Arc::new(Mutex::new(Box::new(store)))
}
