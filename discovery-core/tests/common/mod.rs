// Shared harness and engine test double for the discovery core tests
#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use url::Url;

use discovery_core::{
    CoreConfig, DiscoveryEngine, DocumentManager, EngineEvent, EngineState, FeedManager, SearchManager, SourceManager,
    SqliteStore,
};
use discovery_core::{
    Embedding, EngineDocument, EngineError, EngineFactory, EngineInitConfig, HistoricDocument, Market, MigrationData,
    NewsResource, RankingEngine, ReactedSource, ReactionEvent, StackId, TimeSpentEvent, TrendingTopic,
};
use discovery_core::DocumentId;
use interfaces::defs::EngineResult;
use interfaces::state::CheckpointStore;

/// What the scripted engine answers to the next call.
#[derive(Debug, Clone)]
pub enum Reply {
    Documents(Vec<EngineDocument>),
    Fail(String),
}

impl Reply {
    fn into_result(self) -> EngineResult<Vec<EngineDocument>> {
        match self {
            Reply::Documents(documents) => Ok(documents),
            Reply::Fail(message) => Err(EngineError::Provider(message)),
        }
    }
}

/// Shared script and call log of a [`ScriptedEngine`].
#[derive(Default)]
pub struct Script {
    pub feed: Mutex<VecDeque<Reply>>,
    pub search: Mutex<VecDeque<Reply>>,
    pub deep_search: Mutex<Option<Reply>>,
    pub trending: Mutex<Vec<TrendingTopic>>,
    pub fail_markets: Mutex<bool>,
    pub fail_init: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
    pub reactions: Mutex<Vec<(bool, ReactionEvent)>>,
    pub time_spent: Mutex<Vec<TimeSpentEvent>>,
    pub search_pages: Mutex<Vec<(String, u32)>>,
    pub deep_search_terms: Mutex<Vec<(String, Market, Option<Embedding>)>>,
    pub init_payloads: Mutex<Vec<Option<MigrationData>>>,
    pub mutations: Mutex<u64>,
}

impl Script {
    pub fn push_feed(&self, reply: Reply) {
        self.feed.lock().unwrap().push_back(reply);
    }

    pub fn push_search(&self, reply: Reply) {
        self.search.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|call| call == name)
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn mutate(&self, name: &str) {
        self.record(name);
        *self.mutations.lock().unwrap() += 1;
    }
}

pub struct ScriptedEngine {
    script: Arc<Script>,
    trusted: BTreeSet<String>,
    excluded: BTreeSet<String>,
}

#[async_trait]
impl RankingEngine for ScriptedEngine {
    async fn serialize_state(&self) -> EngineResult<Vec<u8>> {
        Ok(format!("mutations:{}", *self.script.mutations.lock().unwrap()).into_bytes())
    }

    async fn set_markets(&mut self, _history: &[HistoricDocument], _markets: Vec<Market>) -> EngineResult<()> {
        self.script.mutate("set_markets");
        if *self.script.fail_markets.lock().unwrap() {
            return Err(EngineError::Provider("markets rejected".to_string()));
        }
        Ok(())
    }

    async fn feed_next_batch(&mut self, _history: &[HistoricDocument], max_documents: usize) -> EngineResult<Vec<EngineDocument>> {
        self.script.mutate("feed_next_batch");
        let reply = self.script.feed.lock().unwrap().pop_front();
        let mut documents = reply.unwrap_or(Reply::Documents(vec![])).into_result()?;
        documents.truncate(max_documents);
        Ok(documents)
    }

    async fn search_by_query(&mut self, query: &str, page: u32, _page_size: u32) -> EngineResult<Vec<EngineDocument>> {
        self.script.mutate("search_by_query");
        self.script.search_pages.lock().unwrap().push((query.to_string(), page));
        let reply = self.script.search.lock().unwrap().pop_front();
        reply.unwrap_or(Reply::Documents(vec![])).into_result()
    }

    async fn search_by_topic(&mut self, topic: &str, page: u32, _page_size: u32) -> EngineResult<Vec<EngineDocument>> {
        self.script.mutate("search_by_topic");
        self.script.search_pages.lock().unwrap().push((topic.to_string(), page));
        let reply = self.script.search.lock().unwrap().pop_front();
        reply.unwrap_or(Reply::Documents(vec![])).into_result()
    }

    async fn close_search(&mut self) -> EngineResult<()> {
        self.script.mutate("close_search");
        Ok(())
    }

    async fn deep_search(&self, term: &str, market: &Market, embedding: Option<&Embedding>) -> EngineResult<Vec<EngineDocument>> {
        self.script.record("deep_search");
        self.script
            .deep_search_terms
            .lock()
            .unwrap()
            .push((term.to_string(), market.clone(), embedding.cloned()));
        let reply = self.script.deep_search.lock().unwrap().clone();
        reply.unwrap_or(Reply::Documents(vec![])).into_result()
    }

    async fn trending_topics(&mut self) -> EngineResult<Vec<TrendingTopic>> {
        self.script.mutate("trending_topics");
        Ok(self.script.trending.lock().unwrap().clone())
    }

    async fn ingest_reaction(
        &mut self,
        history: Option<&[HistoricDocument]>,
        _reacted_sources: &[ReactedSource],
        event: &ReactionEvent,
    ) -> EngineResult<()> {
        self.script.mutate("ingest_reaction");
        self.script.reactions.lock().unwrap().push((history.is_some(), event.clone()));
        Ok(())
    }

    async fn ingest_time_spent(&mut self, event: &TimeSpentEvent) -> EngineResult<()> {
        self.script.mutate("ingest_time_spent");
        self.script.time_spent.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn set_sources(
        &mut self,
        _history: &[HistoricDocument],
        trusted: &BTreeSet<String>,
        excluded: &BTreeSet<String>,
    ) -> EngineResult<()> {
        self.script.mutate("set_sources");
        self.trusted = trusted.clone();
        self.excluded = excluded.clone();
        Ok(())
    }

    async fn add_trusted_source(&mut self, source: &str) -> EngineResult<()> {
        self.script.mutate("add_trusted_source");
        self.trusted.insert(source.to_string());
        Ok(())
    }

    async fn remove_trusted_source(&mut self, source: &str) -> EngineResult<()> {
        self.script.mutate("remove_trusted_source");
        self.trusted.remove(source);
        Ok(())
    }

    async fn add_excluded_source(&mut self, source: &str) -> EngineResult<()> {
        self.script.mutate("add_excluded_source");
        self.excluded.insert(source.to_string());
        Ok(())
    }

    async fn remove_excluded_source(&mut self, source: &str) -> EngineResult<()> {
        self.script.mutate("remove_excluded_source");
        self.excluded.remove(source);
        Ok(())
    }

    async fn trusted_sources(&self) -> EngineResult<BTreeSet<String>> {
        Ok(self.trusted.clone())
    }

    async fn excluded_sources(&self) -> EngineResult<BTreeSet<String>> {
        Ok(self.excluded.clone())
    }

    async fn reset_ai(&mut self) -> EngineResult<()> {
        self.script.mutate("reset_ai");
        Ok(())
    }
}

pub struct ScriptedFactory {
    pub script: Arc<Script>,
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn initialize(
        &self,
        config: &EngineInitConfig,
        migration: Option<MigrationData>,
        _checkpoint: Option<Vec<u8>>,
    ) -> EngineResult<Box<dyn RankingEngine>> {
        if *self.script.fail_init.lock().unwrap() {
            return Err(EngineError::Init("scripted failure".to_string()));
        }
        let mut trusted = config.trusted_sources.clone();
        let mut excluded = config.excluded_sources.clone();
        if let Some(migration) = &migration {
            trusted.extend(migration.trusted_sources.iter().cloned());
            excluded.extend(migration.excluded_sources.iter().cloned());
        }
        self.script.init_payloads.lock().unwrap().push(migration);
        Ok(Box::new(ScriptedEngine {
            script: self.script.clone(),
            trusted,
            excluded,
        }))
    }
}

pub fn resource(index: usize, domain: &str) -> NewsResource {
    NewsResource {
        title: format!("Title {}", index),
        snippet: format!("Snippet {}", index),
        url: Url::parse(&format!("https://{}/article/{}", domain, index)).unwrap(),
        source_domain: domain.to_string(),
        date_published: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().unwrap(),
        image: None,
        topic: "news".to_string(),
        market: Market::new("en", "US"),
    }
}

pub fn engine_document(index: usize, domain: &str) -> EngineDocument {
    EngineDocument {
        id: DocumentId::new(),
        stack_id: StackId::from_u128(42),
        resource: resource(index, domain),
        embedding: Embedding(vec![index as f32, 1.0]),
    }
}

pub fn engine_documents(count: usize, domain: &str) -> Vec<EngineDocument> {
    (0..count).map(|index| engine_document(index, domain)).collect()
}

/// Managers wired to an in-memory store and a scripted engine.
pub struct Harness {
    pub storage: Arc<SqliteStore>,
    pub script: Arc<Script>,
    pub state: Arc<EngineState>,
    pub documents: DocumentManager,
    pub feed: FeedManager,
    pub search: SearchManager,
    pub sources: SourceManager,
    pub notifications: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Harness {
    pub async fn new() -> anyhow::Result<Self> {
        let _ = tracing_subscriber::fmt::try_init();
        let storage = Arc::new(SqliteStore::in_memory().await?);
        let script = Arc::new(Script::default());
        let factory = ScriptedFactory { script: script.clone() };
        let engine = factory.initialize(&EngineInitConfig::default(), None, None).await?;

        let state = Arc::new(EngineState::new(engine, storage.clone(), None));
        let (sender, notifications) = mpsc::unbounded_channel();
        Ok(Self {
            documents: DocumentManager::new(state.clone(), sender),
            feed: FeedManager::new(state.clone(), 10),
            search: SearchManager::new(state.clone(), 5),
            sources: SourceManager::new(state.clone()),
            storage,
            script,
            state,
            notifications,
        })
    }

    /// Delivers one feed batch of `count` documents from `domain`.
    pub async fn feed_batch(&self, count: usize, domain: &str) -> anyhow::Result<Vec<discovery_core::Document>> {
        self.script.push_feed(Reply::Documents(engine_documents(count, domain)));
        Ok(self.feed.next_batch().await?)
    }

    pub async fn checkpoint(&self) -> anyhow::Result<Option<String>> {
        let checkpoint = self.storage.fetch_checkpoint().await?;
        Ok(checkpoint.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

pub async fn setup_engine(script: Arc<Script>) -> anyhow::Result<(DiscoveryEngine, Arc<SqliteStore>)> {
    let _ = tracing_subscriber::fmt::try_init();
    let storage = Arc::new(SqliteStore::in_memory().await?);
    let engine = DiscoveryEngine::new();
    engine
        .init(&CoreConfig::default(), &ScriptedFactory { script }, storage.clone(), None)
        .await?;
    Ok((engine, storage))
}
