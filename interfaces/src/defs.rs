use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Unique identifier of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for DocumentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of the stack (origin grouping) a document was taken from.
///
/// Documents which don't come from a stack, e.g. search results, use [`StackId::nil`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackId(Uuid);

impl StackId {
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl From<Uuid> for StackId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StackId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserReaction {
    #[default]
    Neutral,
    Positive,
    Negative,
}

impl UserReaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserReaction::Neutral => "neutral",
            UserReaction::Positive => "positive",
            UserReaction::Negative => "negative",
        }
    }
}

impl fmt::Display for UserReaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserReaction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "neutral" => Ok(UserReaction::Neutral),
            "positive" => Ok(UserReaction::Positive),
            "negative" => Ok(UserReaction::Negative),
            _ => Err(format!("Invalid user reaction: {}", s)),
        }
    }
}

/// The way a document was presented while the user looked at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Story,
    Reader,
    Web,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Story => "story",
            ViewMode::Reader => "reader",
            ViewMode::Web => "web",
        }
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "story" => Ok(ViewMode::Story),
            "reader" => Ok(ViewMode::Reader),
            "web" => Ok(ViewMode::Web),
            _ => Err(format!("Invalid view mode: {}", s)),
        }
    }
}

/// A news market, e.g. `en-US`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Market {
    pub lang_code: String,
    pub country_code: String,
}

impl Market {
    pub fn new(lang_code: impl Into<String>, country_code: impl Into<String>) -> Self {
        Self {
            lang_code: lang_code.into(),
            country_code: country_code.into(),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lang_code, self.country_code)
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((lang, country)) if !lang.is_empty() && !country.is_empty() => {
                Ok(Market::new(lang.to_lowercase(), country.to_uppercase()))
            }
            _ => Err(format!("Invalid market, expected `lang-COUNTRY`: {}", s)),
        }
    }
}

/// Dense vector representation of a document produced by the ranking engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Cosine similarity, `0.0` for empty, zero or mismatched vectors.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let dot: f32 = self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum();
        let norm_a = self.0.iter().map(|a| a * a).sum::<f32>().sqrt();
        let norm_b = other.0.iter().map(|b| b * b).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

/// Represents news that is delivered by an external content API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsResource {
    pub title: String,
    pub snippet: String,
    pub url: Url,
    /// The domain of the article's source, e.g. `example.com`. Not a valid URL.
    pub source_domain: String,
    pub date_published: DateTime<Utc>,
    pub image: Option<Url>,
    /// Main topic of the publisher.
    pub topic: String,
    pub market: Market,
}

impl NewsResource {
    /// Gets the snippet or falls back to the title if the snippet is empty.
    pub fn snippet_or_title(&self) -> &str {
        if self.snippet.is_empty() {
            &self.title
        } else {
            &self.snippet
        }
    }
}

/// A document as it is known to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub stack_id: StackId,
    pub resource: NewsResource,
    pub user_reaction: UserReaction,
    /// Still reachable by the client.
    pub is_active: bool,
    /// Originated from a search session rather than the feed.
    pub is_searched: bool,
    /// Position inside the batch it was delivered with.
    pub batch_index: u32,
    /// Time at which the batch was delivered.
    pub timestamp: DateTime<Utc>,
}

impl Document {
    /// Applies a state transition and returns the new value.
    pub fn apply(mut self, transition: DocumentTransition) -> Self {
        match transition {
            DocumentTransition::React(reaction) => self.user_reaction = reaction,
            DocumentTransition::Deactivate => self.is_active = false,
        }
        self
    }

    pub fn historic(&self) -> HistoricDocument {
        HistoricDocument {
            id: self.id,
            url: self.resource.url.clone(),
            title: self.resource.title.clone(),
            snippet: self.resource.snippet.clone(),
        }
    }

    /// Ordering key used whenever a feed or a search is restored.
    pub fn order_key(&self) -> (DateTime<Utc>, u32) {
        (self.timestamp, self.batch_index)
    }
}

/// The only ways the mutable flags of a [`Document`] may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentTransition {
    React(UserReaction),
    Deactivate,
}

/// Mutable companion of an active document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveData {
    pub embedding: Embedding,
    pub view_time: BTreeMap<ViewMode, Duration>,
}

impl ActiveData {
    pub fn new(embedding: Embedding) -> Self {
        Self {
            embedding,
            view_time: BTreeMap::new(),
        }
    }

    /// Accumulates `time` for `mode`, saturating at [`Duration::MAX`].
    pub fn add_view_time(&mut self, mode: ViewMode, time: Duration) {
        let total = self.view_time.entry(mode).or_default();
        *total = total.saturating_add(time);
    }

    pub fn view_time(&self, mode: ViewMode) -> Duration {
        self.view_time.get(&mode).copied().unwrap_or_default()
    }

    /// Sum over all view modes.
    pub fn total_view_time(&self) -> Duration {
        self.view_time.values().fold(Duration::ZERO, |sum, time| sum.saturating_add(*time))
    }
}

/// A document as returned by the ranking engine, before the client assigned
/// any session state to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDocument {
    pub id: DocumentId,
    pub stack_id: StackId,
    pub resource: NewsResource,
    pub embedding: Embedding,
}

/// Represents a [`Document`] in the document history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricDocument {
    pub id: DocumentId,
    pub url: Url,
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBy {
    Query,
    Topic,
}

impl fmt::Display for SearchBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchBy::Query => write!(f, "query"),
            SearchBy::Topic => write!(f, "topic"),
        }
    }
}

impl FromStr for SearchBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "query" => Ok(SearchBy::Query),
            "topic" => Ok(SearchBy::Topic),
            _ => Err(format!("Invalid search mode: {}", s)),
        }
    }
}

/// The single open search session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSearch {
    pub search_term: String,
    pub search_by: SearchBy,
    /// Last page which has been fetched, starting at 1.
    pub page_number: u32,
    pub page_size: u32,
}

/// Like/dislike evidence accumulated for a source through reactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactedSource {
    pub source: String,
    pub liked: bool,
    pub last_reacted: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingTopic {
    pub name: String,
    /// Query term that returns this topic.
    pub query: String,
    pub image: Option<Url>,
}

/// User reacted to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub id: DocumentId,
    pub stack_id: StackId,
    pub title: String,
    pub snippet: String,
    pub embedding: Embedding,
    pub reaction: UserReaction,
    pub market: Market,
}

/// User spent time on a document. The engine doesn't distinguish view modes,
/// `view_time` is the total over all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSpentEvent {
    pub id: DocumentId,
    pub embedding: Embedding,
    pub view_time: Duration,
    pub reaction: UserReaction,
}

/// A document read from the legacy store together with its active data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationDocument {
    pub document: Document,
    pub embedding: Option<Embedding>,
    pub view_time: BTreeMap<ViewMode, Duration>,
}

/// Snapshot of everything the legacy store held, handed once to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationData {
    pub engine_state: Option<Vec<u8>>,
    pub trusted_sources: BTreeSet<String>,
    pub excluded_sources: BTreeSet<String>,
    pub reacted_sources: Vec<ReactedSource>,
    pub documents: Vec<MigrationDocument>,
    pub search: Option<ActiveSearch>,
}

impl MigrationData {
    pub fn is_empty(&self) -> bool {
        self.engine_state.is_none()
            && self.trusted_sources.is_empty()
            && self.excluded_sources.is_empty()
            && self.reacted_sources.is_empty()
            && self.documents.is_empty()
            && self.search.is_none()
    }
}

/// Configuration handed to the engine on initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineInitConfig {
    pub markets: Vec<Market>,
    pub trusted_sources: BTreeSet<String>,
    pub excluded_sources: BTreeSet<String>,
    /// Engine specific settings in JSON format.
    pub engine_config: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine initialization failed: {0}")]
    Init(String),

    #[error("Failed to (de)serialize engine state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid search term")]
    InvalidTerm,

    #[error("unsupported market {0}")]
    UnsupportedMarket(Market),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Ranker error: {0}")]
    Ranker(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// The black-box ranking engine.
///
/// Every `&mut self` operation changes the internal state, which the caller is
/// expected to checkpoint with [`RankingEngine::serialize_state`] afterwards.
#[async_trait]
pub trait RankingEngine: Send + Sync {
    async fn serialize_state(&self) -> EngineResult<Vec<u8>>;

    async fn set_markets(&mut self, history: &[HistoricDocument], markets: Vec<Market>) -> EngineResult<()>;

    async fn feed_next_batch(&mut self, history: &[HistoricDocument], max_documents: usize) -> EngineResult<Vec<EngineDocument>>;

    async fn search_by_query(&mut self, query: &str, page: u32, page_size: u32) -> EngineResult<Vec<EngineDocument>>;

    async fn search_by_topic(&mut self, topic: &str, page: u32, page_size: u32) -> EngineResult<Vec<EngineDocument>>;

    /// Drops any search specific state.
    async fn close_search(&mut self) -> EngineResult<()>;

    /// One-shot search for documents similar to `term`, not tied to the active search.
    async fn deep_search(&self, term: &str, market: &Market, embedding: Option<&Embedding>) -> EngineResult<Vec<EngineDocument>>;

    async fn trending_topics(&mut self) -> EngineResult<Vec<TrendingTopic>>;

    async fn ingest_reaction(
        &mut self,
        history: Option<&[HistoricDocument]>,
        reacted_sources: &[ReactedSource],
        event: &ReactionEvent,
    ) -> EngineResult<()>;

    async fn ingest_time_spent(&mut self, event: &TimeSpentEvent) -> EngineResult<()>;

    async fn set_sources(
        &mut self,
        history: &[HistoricDocument],
        trusted: &BTreeSet<String>,
        excluded: &BTreeSet<String>,
    ) -> EngineResult<()>;

    async fn add_trusted_source(&mut self, source: &str) -> EngineResult<()>;

    async fn remove_trusted_source(&mut self, source: &str) -> EngineResult<()>;

    async fn add_excluded_source(&mut self, source: &str) -> EngineResult<()>;

    async fn remove_excluded_source(&mut self, source: &str) -> EngineResult<()>;

    async fn trusted_sources(&self) -> EngineResult<BTreeSet<String>>;

    async fn excluded_sources(&self) -> EngineResult<BTreeSet<String>>;

    /// Forgets everything learned about the user.
    async fn reset_ai(&mut self) -> EngineResult<()>;
}

/// Constructs a [`RankingEngine`], one implementation per environment.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn initialize(
        &self,
        config: &EngineInitConfig,
        migration: Option<MigrationData>,
        checkpoint: Option<Vec<u8>>,
    ) -> EngineResult<Box<dyn RankingEngine>>;
}
