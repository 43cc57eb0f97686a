use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::defs::DocumentId;
use crate::defs::Embedding;
use crate::defs::EngineDocument;
use crate::defs::EngineError;
use crate::defs::EngineFactory;
use crate::defs::EngineInitConfig;
use crate::defs::EngineResult;
use crate::defs::HistoricDocument;
use crate::defs::Market;
use crate::defs::MigrationData;
use crate::defs::NewsResource;
use crate::defs::RankingEngine;
use crate::defs::ReactedSource;
use crate::defs::ReactionEvent;
use crate::defs::StackId;
use crate::defs::TimeSpentEvent;
use crate::defs::TrendingTopic;
use crate::defs::UserReaction;

/// Stack all feed documents of the baseline engine belong to.
pub const BASELINE_STACK: StackId = StackId::from_u128(0x6261_7365_6c69_6e65);

const TRENDING_TOPICS: usize = 5;
const DEEP_SEARCH_RESULTS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub embedding_size: usize,
    /// Trusted sources get this added to their score.
    pub trusted_boost: f32,
    /// Viewing a document at least this long counts as weak positive evidence.
    pub min_view_time_secs: u64,
    pub min_deep_search_similarity: f32,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            embedding_size: 32,
            trusted_boost: 0.5,
            min_view_time_secs: 5,
            min_deep_search_similarity: 0.05,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Interest {
    embedding: Embedding,
    weight: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct BaselineState {
    markets: Vec<Market>,
    trusted: BTreeSet<String>,
    excluded: BTreeSet<String>,
    served: BTreeSet<Url>,
    interests: BTreeMap<DocumentId, Interest>,
    reacted_sources: Vec<ReactedSource>,
}

impl BaselineState {
    fn absorb(&mut self, migration: &MigrationData, config: &BaselineConfig) {
        self.trusted.extend(migration.trusted_sources.iter().cloned());
        self.excluded.extend(migration.excluded_sources.iter().cloned());
        for reacted in &migration.reacted_sources {
            if !self.reacted_sources.iter().any(|known| known.source == reacted.source) {
                self.reacted_sources.push(reacted.clone());
            }
        }
        for migrated in &migration.documents {
            let document = &migrated.document;
            self.served.insert(document.resource.url.clone());
            let weight = match document.user_reaction {
                UserReaction::Positive => 1.0,
                UserReaction::Negative => -1.0,
                UserReaction::Neutral => continue,
            };
            let embedding = migrated
                .embedding
                .clone()
                .unwrap_or_else(|| embed(&document.resource.title, config.embedding_size));
            self.interests.insert(document.id, Interest { embedding, weight });
        }
    }

    fn centroid(&self, size: usize) -> Option<Embedding> {
        if self.interests.is_empty() {
            return None;
        }
        let mut sum = vec![0.0f32; size];
        for interest in self.interests.values() {
            for (slot, value) in sum.iter_mut().zip(&interest.embedding.0) {
                *slot += value * interest.weight;
            }
        }
        Some(Embedding(sum))
    }
}

/// Feature-hashed bag of words, L2 normalized.
pub fn embed(text: &str, size: usize) -> Embedding {
    let mut vector = vec![0.0f32; size.max(1)];
    for token in tokenize(text) {
        let hash = fnv1a(token.as_bytes());
        let slot = (hash % vector.len() as u64) as usize;
        let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    Embedding(vector)
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 2)
        .map(|token| token.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn is_blank(term: &str) -> bool {
    term.trim().is_empty()
}

fn to_document(resource: &NewsResource, stack_id: StackId, size: usize) -> EngineDocument {
    EngineDocument {
        id: DocumentId::new(),
        stack_id,
        embedding: embed(&format!("{} {}", resource.title, resource.snippet), size),
        resource: resource.clone(),
    }
}

fn page<T: Clone>(items: &[T], page: u32, page_size: u32) -> Vec<T> {
    let start = (page.saturating_sub(1) as usize).saturating_mul(page_size as usize);
    items.iter().skip(start).take(page_size as usize).cloned().collect()
}

/// Deterministic in-memory ranking over a fixed corpus.
pub struct BaselineEngine {
    corpus: Arc<Vec<NewsResource>>,
    config: BaselineConfig,
    state: BaselineState,
}

impl BaselineEngine {
    fn in_markets<'a>(&'a self) -> impl Iterator<Item = &'a NewsResource> + 'a {
        self.corpus.iter().filter(move |resource| {
            self.state.markets.contains(&resource.market) && !self.state.excluded.contains(&resource.source_domain)
        })
    }

    fn search(&self, term: &str, page_number: u32, page_size: u32, matches: impl Fn(&NewsResource) -> bool) -> EngineResult<Vec<EngineDocument>> {
        if is_blank(term) {
            return Err(EngineError::InvalidTerm);
        }
        let mut hits = self.in_markets().filter(|resource| matches(*resource)).collect::<Vec<_>>();
        hits.sort_by(|a, b| b.date_published.cmp(&a.date_published).then_with(|| a.url.cmp(&b.url)));
        Ok(page(&hits, page_number, page_size)
            .into_iter()
            .map(|resource| to_document(resource, StackId::nil(), self.config.embedding_size))
            .collect())
    }
}

#[async_trait]
impl RankingEngine for BaselineEngine {
    async fn serialize_state(&self) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.state)?)
    }

    async fn set_markets(&mut self, history: &[HistoricDocument], markets: Vec<Market>) -> EngineResult<()> {
        info!("Baseline engine switching to {} markets", markets.len());
        self.state.served.extend(history.iter().map(|doc| doc.url.clone()));
        self.state.markets = markets;
        Ok(())
    }

    async fn feed_next_batch(&mut self, history: &[HistoricDocument], max_documents: usize) -> EngineResult<Vec<EngineDocument>> {
        let seen = history.iter().map(|doc| &doc.url).collect::<BTreeSet<_>>();
        let size = self.config.embedding_size;
        let centroid = self.state.centroid(size);

        let mut candidates = self
            .in_markets()
            .filter(|resource| !self.state.served.contains(&resource.url) && !seen.contains(&resource.url))
            .map(|resource| {
                let document = to_document(resource, BASELINE_STACK, size);
                let mut score = centroid
                    .as_ref()
                    .map(|centroid| centroid.cosine_similarity(&document.embedding))
                    .unwrap_or_default();
                if self.state.trusted.contains(&resource.source_domain) {
                    score += self.config.trusted_boost;
                }
                (score, document)
            })
            .collect::<Vec<_>>();
        candidates.sort_by(|(a, doc_a), (b, doc_b)| {
            b.total_cmp(a)
                .then_with(|| doc_b.resource.date_published.cmp(&doc_a.resource.date_published))
        });
        candidates.truncate(max_documents);

        let batch = candidates.into_iter().map(|(_, document)| document).collect::<Vec<_>>();
        self.state.served.extend(batch.iter().map(|doc| doc.resource.url.clone()));
        debug!("Baseline engine ranked a batch of {}", batch.len());
        Ok(batch)
    }

    async fn search_by_query(&mut self, query: &str, page: u32, page_size: u32) -> EngineResult<Vec<EngineDocument>> {
        let tokens = tokenize(query).collect::<Vec<_>>();
        self.search(query, page, page_size, |resource| {
            let text = format!("{} {}", resource.title, resource.snippet).to_lowercase();
            tokens.iter().any(|token| text.contains(token.as_str()))
        })
    }

    async fn search_by_topic(&mut self, topic: &str, page: u32, page_size: u32) -> EngineResult<Vec<EngineDocument>> {
        let topic = topic.trim().to_lowercase();
        self.search(&topic, page, page_size, |resource| resource.topic.to_lowercase() == topic)
    }

    async fn close_search(&mut self) -> EngineResult<()> {
        Ok(())
    }

    async fn deep_search(&self, term: &str, market: &Market, embedding: Option<&Embedding>) -> EngineResult<Vec<EngineDocument>> {
        if is_blank(term) {
            return Err(EngineError::InvalidTerm);
        }
        if !self.state.markets.contains(market) {
            return Err(EngineError::UnsupportedMarket(market.clone()));
        }
        let size = self.config.embedding_size;
        let query = embedding.cloned().unwrap_or_else(|| embed(term, size));

        let mut hits = self
            .in_markets()
            .filter(|resource| &resource.market == market && resource.snippet_or_title() != term)
            .map(|resource| to_document(resource, StackId::nil(), size))
            .map(|document| (query.cosine_similarity(&document.embedding), document))
            .filter(|(score, _)| *score >= self.config.min_deep_search_similarity)
            .collect::<Vec<_>>();
        hits.sort_by(|(a, _), (b, _)| b.total_cmp(a));
        Ok(hits.into_iter().take(DEEP_SEARCH_RESULTS).map(|(_, document)| document).collect())
    }

    async fn trending_topics(&mut self) -> EngineResult<Vec<TrendingTopic>> {
        let mut counts: HashMap<&str, (usize, Option<&Url>)> = HashMap::new();
        for resource in self.in_markets() {
            let entry = counts.entry(resource.topic.as_str()).or_insert((0, None));
            entry.0 += 1;
            if entry.1.is_none() {
                entry.1 = resource.image.as_ref();
            }
        }
        let mut topics = counts.into_iter().collect::<Vec<_>>();
        topics.sort_by(|(a, (count_a, _)), (b, (count_b, _))| count_b.cmp(count_a).then_with(|| a.cmp(b)));
        Ok(topics
            .into_iter()
            .take(TRENDING_TOPICS)
            .map(|(name, (_, image))| TrendingTopic {
                name: name.to_owned(),
                query: name.to_owned(),
                image: image.cloned(),
            })
            .collect())
    }

    async fn ingest_reaction(
        &mut self,
        history: Option<&[HistoricDocument]>,
        reacted_sources: &[ReactedSource],
        event: &ReactionEvent,
    ) -> EngineResult<()> {
        if let Some(history) = history {
            self.state.served.extend(history.iter().map(|doc| doc.url.clone()));
        }
        self.state.reacted_sources = reacted_sources.to_vec();
        match event.reaction {
            UserReaction::Positive => {
                self.state.interests.insert(event.id, Interest { embedding: event.embedding.clone(), weight: 1.0 });
            }
            UserReaction::Negative => {
                self.state.interests.insert(event.id, Interest { embedding: event.embedding.clone(), weight: -1.0 });
            }
            UserReaction::Neutral => {
                self.state.interests.remove(&event.id);
            }
        }
        debug!("Baseline engine knows {} interests", self.state.interests.len());
        Ok(())
    }

    async fn ingest_time_spent(&mut self, event: &TimeSpentEvent) -> EngineResult<()> {
        if event.reaction == UserReaction::Negative
            || event.view_time < Duration::from_secs(self.config.min_view_time_secs)
        {
            return Ok(());
        }
        self.state
            .interests
            .entry(event.id)
            .or_insert_with(|| Interest { embedding: event.embedding.clone(), weight: 0.5 });
        Ok(())
    }

    async fn set_sources(
        &mut self,
        history: &[HistoricDocument],
        trusted: &BTreeSet<String>,
        excluded: &BTreeSet<String>,
    ) -> EngineResult<()> {
        self.state.served.extend(history.iter().map(|doc| doc.url.clone()));
        self.state.trusted = trusted.clone();
        self.state.excluded = excluded.clone();
        Ok(())
    }

    async fn add_trusted_source(&mut self, source: &str) -> EngineResult<()> {
        self.state.excluded.remove(source);
        self.state.trusted.insert(source.to_owned());
        Ok(())
    }

    async fn remove_trusted_source(&mut self, source: &str) -> EngineResult<()> {
        self.state.trusted.remove(source);
        Ok(())
    }

    async fn add_excluded_source(&mut self, source: &str) -> EngineResult<()> {
        self.state.trusted.remove(source);
        self.state.excluded.insert(source.to_owned());
        Ok(())
    }

    async fn remove_excluded_source(&mut self, source: &str) -> EngineResult<()> {
        self.state.excluded.remove(source);
        Ok(())
    }

    async fn trusted_sources(&self) -> EngineResult<BTreeSet<String>> {
        Ok(self.state.trusted.clone())
    }

    async fn excluded_sources(&self) -> EngineResult<BTreeSet<String>> {
        Ok(self.state.excluded.clone())
    }

    async fn reset_ai(&mut self) -> EngineResult<()> {
        info!("Baseline engine forgetting {} interests", self.state.interests.len());
        self.state.interests.clear();
        self.state.served.clear();
        self.state.reacted_sources.clear();
        Ok(())
    }
}

/// Builds [`BaselineEngine`]s over a shared corpus.
#[derive(Clone, Default)]
pub struct BaselineFactory {
    corpus: Arc<Vec<NewsResource>>,
}

impl BaselineFactory {
    pub fn new(corpus: Vec<NewsResource>) -> Self {
        Self { corpus: Arc::new(corpus) }
    }

    pub fn corpus(&self) -> &[NewsResource] {
        &self.corpus
    }

    /// A small built-in corpus in the `en-US` market.
    pub fn with_sample_corpus() -> Self {
        let market = Market::new("en", "US");
        let samples = [
            ("reuters.com", "world", "Leaders meet for climate summit", "Talks focus on emission targets and financing."),
            ("bbc.com", "world", "Flooding displaces thousands", "Heavy rain caused rivers to burst their banks."),
            ("bloomberg.com", "business", "Markets rally on rate cut hopes", "Stocks climbed as investors bet on lower rates."),
            ("ft.com", "business", "Chipmakers report record demand", "Semiconductor orders outpace supply for a third quarter."),
            ("wsj.com", "business", "Retail sales beat expectations", "Consumers kept spending despite higher prices."),
            ("nytimes.com", "science", "Telescope captures distant galaxy", "Astronomers describe the oldest galaxy observed so far."),
            ("washingtonpost.com", "science", "New battery chemistry lasts longer", "Researchers show a cell that survives thousands of cycles."),
            ("cnn.com", "sports", "Underdogs win the championship", "A late goal sealed the title in extra time."),
            ("ap.org", "sports", "Marathon record falls", "The winner finished two minutes under the old mark."),
            ("reuters.com", "technology", "Open source compiler reaches milestone", "The Rust compiler release improves build times."),
        ];
        let corpus = samples
            .iter()
            .enumerate()
            .filter_map(|(index, (domain, topic, title, snippet))| {
                let url = Url::parse(&format!("https://{}/articles/{}", domain, index)).ok()?;
                let date_published = Utc.with_ymd_and_hms(2024, 1, 1 + index as u32, 8, 0, 0).single()?;
                Some(NewsResource {
                    title: (*title).to_owned(),
                    snippet: (*snippet).to_owned(),
                    url,
                    source_domain: (*domain).to_owned(),
                    date_published,
                    image: Url::parse(&format!("https://{}/images/{}.jpg", domain, index)).ok(),
                    topic: (*topic).to_owned(),
                    market: market.clone(),
                })
            })
            .collect();
        Self::new(corpus)
    }
}

#[async_trait]
impl EngineFactory for BaselineFactory {
    async fn initialize(
        &self,
        config: &EngineInitConfig,
        migration: Option<MigrationData>,
        checkpoint: Option<Vec<u8>>,
    ) -> EngineResult<Box<dyn RankingEngine>> {
        let engine_config = match &config.engine_config {
            Some(json) => serde_json::from_str::<BaselineConfig>(json)
                .map_err(|err| EngineError::Init(format!("invalid engine config: {}", err)))?,
            None => BaselineConfig::default(),
        };

        let previous = checkpoint.or_else(|| migration.as_ref().and_then(|data| data.engine_state.clone()));
        let mut state = match previous {
            Some(bytes) => serde_json::from_slice::<BaselineState>(&bytes)?,
            None => BaselineState {
                trusted: config.trusted_sources.clone(),
                excluded: config.excluded_sources.clone(),
                ..BaselineState::default()
            },
        };
        if !config.markets.is_empty() {
            state.markets = config.markets.clone();
        }
        if let Some(migration) = &migration {
            info!("Baseline engine absorbing {} migrated documents", migration.documents.len());
            state.absorb(migration, &engine_config);
        }
        state.trusted.retain(|source| !state.excluded.contains(source));

        Ok(Box::new(BaselineEngine {
            corpus: Arc::clone(&self.corpus),
            config: engine_config,
            state,
        }))
    }
}
