use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::defs::Embedding;
use crate::defs::EngineDocument;
use crate::defs::EngineFactory;
use crate::defs::EngineInitConfig;
use crate::defs::EngineResult;
use crate::defs::HistoricDocument;
use crate::defs::Market;
use crate::defs::MigrationData;
use crate::defs::RankingEngine;
use crate::defs::ReactedSource;
use crate::defs::ReactionEvent;
use crate::defs::TimeSpentEvent;
use crate::defs::TrendingTopic;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EmptyEngine {
    trusted: BTreeSet<String>,
    excluded: BTreeSet<String>,
}

#[async_trait]
impl RankingEngine for EmptyEngine {
    async fn serialize_state(&self) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    async fn set_markets(&mut self, _history: &[HistoricDocument], _markets: Vec<Market>) -> EngineResult<()> {
        Ok(())
    }

    async fn feed_next_batch(&mut self, _history: &[HistoricDocument], _max_documents: usize) -> EngineResult<Vec<EngineDocument>> {
        // Nothing matters, the ideal feed is empty.
        Ok(vec![])
    }

    async fn search_by_query(&mut self, _query: &str, _page: u32, _page_size: u32) -> EngineResult<Vec<EngineDocument>> {
        Ok(vec![])
    }

    async fn search_by_topic(&mut self, _topic: &str, _page: u32, _page_size: u32) -> EngineResult<Vec<EngineDocument>> {
        Ok(vec![])
    }

    async fn close_search(&mut self) -> EngineResult<()> {
        Ok(())
    }

    async fn deep_search(&self, _term: &str, _market: &Market, _embedding: Option<&Embedding>) -> EngineResult<Vec<EngineDocument>> {
        Ok(vec![])
    }

    async fn trending_topics(&mut self) -> EngineResult<Vec<TrendingTopic>> {
        Ok(vec![])
    }

    async fn ingest_reaction(&mut self, _history: Option<&[HistoricDocument]>, _reacted_sources: &[ReactedSource], _event: &ReactionEvent) -> EngineResult<()> {
        Ok(())
    }

    async fn ingest_time_spent(&mut self, _event: &TimeSpentEvent) -> EngineResult<()> {
        Ok(())
    }

    async fn set_sources(&mut self, _history: &[HistoricDocument], trusted: &BTreeSet<String>, excluded: &BTreeSet<String>) -> EngineResult<()> {
        self.trusted = trusted.clone();
        self.excluded = excluded.clone();
        Ok(())
    }

    async fn add_trusted_source(&mut self, source: &str) -> EngineResult<()> {
        self.trusted.insert(source.to_owned());
        Ok(())
    }

    async fn remove_trusted_source(&mut self, source: &str) -> EngineResult<()> {
        self.trusted.remove(source);
        Ok(())
    }

    async fn add_excluded_source(&mut self, source: &str) -> EngineResult<()> {
        self.excluded.insert(source.to_owned());
        Ok(())
    }

    async fn remove_excluded_source(&mut self, source: &str) -> EngineResult<()> {
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
        Ok(())
    }
}

pub struct EmptyFactory;

#[async_trait]
impl EngineFactory for EmptyFactory {
    async fn initialize(&self, config: &EngineInitConfig, migration: Option<MigrationData>, _checkpoint: Option<Vec<u8>>) -> EngineResult<Box<dyn RankingEngine>> {
        let mut engine = EmptyEngine {
            trusted: config.trusted_sources.clone(),
            excluded: config.excluded_sources.clone(),
        };
        if let Some(migration) = migration {
            engine.trusted.extend(migration.trusted_sources);
            engine.excluded.extend(migration.excluded_sources);
        }
        Ok(Box::new(engine))
    }
}
