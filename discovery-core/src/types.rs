use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use interfaces::defs::{
    ActiveData, ActiveSearch, Document, DocumentId, DocumentTransition, Embedding, EngineDocument,
    EngineError, EngineFactory, EngineInitConfig, HistoricDocument, Market, MigrationData, NewsResource,
    RankingEngine, ReactedSource, ReactionEvent, SearchBy, StackId, TimeSpentEvent, TrendingTopic,
    UserReaction, ViewMode,
};
pub use interfaces::state::{DocumentFilter, Storage, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Document {id} is not active")]
    NotActive { id: DocumentId },

    #[error("No search is active")]
    NoActiveSearch,

    #[error("A search is already active")]
    OpenActiveSearch,

    #[error("No results available")]
    NoResultsAvailable,

    #[error("No news for the configured markets")]
    NoNewsForMarket,

    #[error("Sources are both trusted and excluded: {0:?}")]
    DuplicateSources(BTreeSet<String>),

    #[error("Source {domain} is already in the opposite list")]
    SourceConflict { domain: String },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Engine has been disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// A source the user can pick from when editing preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSource {
    pub name: String,
    pub domain: String,
}

/// Requests a client sends to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    ConfigurationChanged {
        markets: Option<Vec<Market>>,
        max_batch_size: Option<u32>,
    },
    FeedRequested,
    NextFeedBatchRequested,
    FeedDocumentsClosed { ids: Vec<DocumentId> },
    UserReactionChanged { id: DocumentId, reaction: UserReaction },
    TimeSpent { id: DocumentId, view_mode: ViewMode, seconds: i64 },
    ActiveSearchRequested { term: String, by: SearchBy },
    NextActiveSearchBatchRequested,
    RestoreActiveSearchRequested,
    ActiveSearchTermRequested,
    ActiveSearchClosed,
    DeepSearchRequested { term: String, market: Market },
    DeepSearchByIdRequested { id: DocumentId },
    TrendingTopicsRequested,
    SetSourcesRequested { trusted: BTreeSet<String>, excluded: BTreeSet<String> },
    AddTrustedSourceRequested { source: String },
    RemoveTrustedSourceRequested { source: String },
    AddExcludedSourceRequested { source: String },
    RemoveExcludedSourceRequested { source: String },
    TrustedSourcesListRequested,
    ExcludedSourcesListRequested,
    AvailableSourcesListRequested { fuzzy_term: String },
    ResetAi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedFailureReason {
    NoNewsForMarket,
    StacksOpsError { message: String },
    DbError { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchFailureReason {
    NoActiveSearch,
    OpenActiveSearch,
    NoResultsAvailable,
    InvalidTerm,
    DocumentNotActive,
    DbError { message: String },
    EngineError { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceFailureReason {
    DuplicateSources { sources: BTreeSet<String> },
    SourceConflict { source: String },
    InvalidSource,
    NoResultsAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineExceptionReason {
    EngineNotReady,
    EngineDisposed,
    InvalidArgument,
    DocumentNotActive,
    EngineError,
    DbError,
    GenericError,
}

/// Outcomes and notifications the engine sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ClientEventSucceeded,
    FeedRequestSucceeded { items: Vec<Document> },
    FeedRequestFailed { reason: FeedFailureReason },
    NextFeedBatchRequestSucceeded { items: Vec<Document> },
    NextFeedBatchRequestFailed { reason: FeedFailureReason },
    DocumentsUpdated { items: Vec<Document> },
    ActiveSearchRequestSucceeded { search: ActiveSearch, items: Vec<Document> },
    ActiveSearchRequestFailed { reason: SearchFailureReason },
    NextActiveSearchBatchRequestSucceeded { search: ActiveSearch, items: Vec<Document> },
    NextActiveSearchBatchRequestFailed { reason: SearchFailureReason },
    RestoreActiveSearchSucceeded { search: ActiveSearch, items: Vec<Document> },
    RestoreActiveSearchFailed { reason: SearchFailureReason },
    ActiveSearchTermRequestSucceeded { search_term: String },
    ActiveSearchTermRequestFailed { reason: SearchFailureReason },
    ActiveSearchClosedSucceeded,
    ActiveSearchClosedFailed { reason: SearchFailureReason },
    DeepSearchRequestSucceeded { items: Vec<EngineDocument> },
    DeepSearchRequestFailed { reason: SearchFailureReason },
    TrendingTopicsRequestSucceeded { topics: Vec<TrendingTopic> },
    TrendingTopicsRequestFailed { reason: SearchFailureReason },
    SetSourcesRequestSucceeded { trusted: BTreeSet<String>, excluded: BTreeSet<String> },
    SetSourcesRequestFailed { reason: SourceFailureReason },
    TrustedSourceAdded { source: String },
    TrustedSourceRemoved { source: String },
    ExcludedSourceAdded { source: String },
    ExcludedSourceRemoved { source: String },
    SourceRequestFailed { reason: SourceFailureReason },
    TrustedSourcesListRequestSucceeded { sources: BTreeSet<String> },
    ExcludedSourcesListRequestSucceeded { sources: BTreeSet<String> },
    AvailableSourcesListRequestSucceeded { sources: Vec<AvailableSource> },
    AvailableSourcesListRequestFailed { reason: SourceFailureReason },
    ResetAiSucceeded,
    EngineExceptionRaised { reason: EngineExceptionReason, message: String },
}

impl EngineEvent {
    pub fn exception(reason: EngineExceptionReason, message: impl Into<String>) -> Self {
        EngineEvent::EngineExceptionRaised {
            reason,
            message: message.into(),
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, EngineEvent::EngineExceptionRaised { .. })
    }
}

impl From<CoreError> for EngineEvent {
    /// Fallback for errors a request has no dedicated failure event for.
    fn from(err: CoreError) -> Self {
        let reason = match &err {
            CoreError::InvalidArgument(_) => EngineExceptionReason::InvalidArgument,
            CoreError::NotActive { .. } => EngineExceptionReason::DocumentNotActive,
            CoreError::Engine(_) => EngineExceptionReason::EngineError,
            CoreError::Store(_) => EngineExceptionReason::DbError,
            CoreError::Disposed => EngineExceptionReason::EngineDisposed,
            _ => EngineExceptionReason::GenericError,
        };
        EngineEvent::exception(reason, err.to_string())
    }
}
