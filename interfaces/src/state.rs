use std::collections::BTreeSet;
use std::fmt::Display;

use async_trait::async_trait;

use crate::defs::ActiveData;
use crate::defs::ActiveSearch;
use crate::defs::Document;
use crate::defs::DocumentId;
use crate::defs::DocumentTransition;
use crate::defs::ReactedSource;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Stored data is corrupted: {0}")]
    Corrupted(String),

    #[error("Conflicting store operation: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn backend(err: impl Display) -> Self {
        StoreError::Backend(err.to_string())
    }

    pub fn corrupted(err: impl Display) -> Self {
        StoreError::Corrupted(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Restricts [`DocumentStore::fetch_documents`], `None` matches both values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub active: Option<bool>,
    pub searched: Option<bool>,
}

impl DocumentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn feed() -> Self {
        Self {
            active: Some(true),
            searched: Some(false),
        }
    }

    pub fn search() -> Self {
        Self {
            active: Some(true),
            searched: Some(true),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch_document(&self, id: DocumentId) -> StoreResult<Option<Document>>;

    /// Documents matching `filter`, in no particular order.
    async fn fetch_documents(&self, filter: DocumentFilter) -> StoreResult<Vec<Document>>;

    async fn upsert_documents(&self, documents: &[Document]) -> StoreResult<()>;

    /// Persists a batch of new documents together with their active data, atomically.
    async fn store_batch(&self, batch: &[(Document, ActiveData)]) -> StoreResult<()>;

    /// Applies `transition` and returns the updated document, `None` if unknown.
    async fn transition_document(&self, id: DocumentId, transition: DocumentTransition) -> StoreResult<Option<Document>>;

    /// Flips documents to inactive and drops their active data and changed markers.
    async fn deactivate_documents(&self, ids: &[DocumentId]) -> StoreResult<()>;

    async fn fetch_active_data(&self, id: DocumentId) -> StoreResult<Option<ActiveData>>;

    async fn upsert_active_data(&self, id: DocumentId, data: &ActiveData) -> StoreResult<()>;

    async fn fetch_changed(&self) -> StoreResult<Vec<DocumentId>>;
}

#[async_trait]
pub trait SearchStore: Send + Sync {
    async fn fetch_search(&self) -> StoreResult<Option<ActiveSearch>>;

    /// Stores the singleton together with the first page of results.
    ///
    /// Fails with [`StoreError::Conflict`] if a search already exists.
    async fn store_new_search(&self, search: &ActiveSearch, batch: &[(Document, ActiveData)]) -> StoreResult<()>;

    /// Advances the page number and stores the results of that page.
    async fn store_next_page(&self, page_number: u32, batch: &[(Document, ActiveData)]) -> StoreResult<()>;

    /// Clears the singleton, deactivating `keep` and deleting `delete` in one transaction.
    async fn close_search(&self, keep: &[DocumentId], delete: &[DocumentId]) -> StoreResult<()>;
}

#[async_trait]
pub trait SourcePreferenceStore: Send + Sync {
    async fn fetch_trusted(&self) -> StoreResult<BTreeSet<String>>;

    async fn fetch_excluded(&self) -> StoreResult<BTreeSet<String>>;

    /// Replaces both sets atomically.
    async fn set_sources(&self, trusted: &BTreeSet<String>, excluded: &BTreeSet<String>) -> StoreResult<()>;

    async fn set_trusted(&self, sources: &BTreeSet<String>) -> StoreResult<()>;

    async fn set_excluded(&self, sources: &BTreeSet<String>) -> StoreResult<()>;

    async fn fetch_reacted_sources(&self) -> StoreResult<Vec<ReactedSource>>;

    async fn fetch_reacted_source(&self, source: &str) -> StoreResult<Option<ReactedSource>>;

    async fn upsert_reacted_source(&self, source: &ReactedSource) -> StoreResult<()>;

    async fn delete_reacted_source(&self, source: &str) -> StoreResult<()>;
}

/// Single slot holding the serialized ranking engine.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn store_checkpoint(&self, state: &[u8]) -> StoreResult<()>;

    async fn fetch_checkpoint(&self) -> StoreResult<Option<Vec<u8>>>;
}

/// Everything the orchestration layer persists.
pub trait Storage: DocumentStore + SearchStore + SourcePreferenceStore + CheckpointStore {}

impl<T> Storage for T where T: DocumentStore + SearchStore + SourcePreferenceStore + CheckpointStore {}
