use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog;
use crate::state::EngineState;
use crate::types::{AvailableSource, CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceList {
    Trusted,
    Excluded,
}

impl SourceList {
    fn opposite(self) -> Self {
        match self {
            SourceList::Trusted => SourceList::Excluded,
            SourceList::Excluded => SourceList::Trusted,
        }
    }
}

fn normalize(source: &str) -> Result<String> {
    let source = source.trim().to_lowercase();
    if source.is_empty() {
        return Err(CoreError::InvalidArgument("source must not be blank".to_string()));
    }
    Ok(source)
}

/// Trusted and excluded sources. A source is never in both lists.
pub struct SourceManager {
    state: Arc<EngineState>,
}

impl SourceManager {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    pub async fn set_sources(&self, trusted: BTreeSet<String>, excluded: BTreeSet<String>) -> Result<()> {
        let duplicates = trusted.intersection(&excluded).cloned().collect::<BTreeSet<_>>();
        if !duplicates.is_empty() {
            return Err(CoreError::DuplicateSources(duplicates));
        }

        let mut engine = self.state.engine().await;
        self.state.storage().set_sources(&trusted, &excluded).await?;
        let history = self.state.history().await?;
        engine.set_sources(&history, &trusted, &excluded).await?;
        self.state.checkpoint(&**engine).await?;

        info!("Replaced sources: {} trusted, {} excluded", trusted.len(), excluded.len());
        Ok(())
    }

    pub async fn add_trusted(&self, source: &str) -> Result<String> {
        self.add(SourceList::Trusted, source).await
    }

    pub async fn remove_trusted(&self, source: &str) -> Result<String> {
        self.remove(SourceList::Trusted, source).await
    }

    pub async fn add_excluded(&self, source: &str) -> Result<String> {
        self.add(SourceList::Excluded, source).await
    }

    pub async fn remove_excluded(&self, source: &str) -> Result<String> {
        self.remove(SourceList::Excluded, source).await
    }

    pub async fn trusted_sources(&self) -> Result<BTreeSet<String>> {
        let engine = self.state.engine().await;
        Ok(engine.trusted_sources().await?)
    }

    pub async fn excluded_sources(&self) -> Result<BTreeSet<String>> {
        let engine = self.state.engine().await;
        Ok(engine.excluded_sources().await?)
    }

    pub fn search_available_sources(&self, fuzzy_term: &str) -> Result<Vec<AvailableSource>> {
        let sources = catalog::search(fuzzy_term);
        if sources.is_empty() {
            return Err(CoreError::NoResultsAvailable);
        }
        Ok(sources)
    }

    async fn fetch(&self, list: SourceList) -> Result<BTreeSet<String>> {
        let storage = self.state.storage();
        let sources = match list {
            SourceList::Trusted => storage.fetch_trusted().await?,
            SourceList::Excluded => storage.fetch_excluded().await?,
        };
        Ok(sources)
    }

    async fn store(&self, list: SourceList, sources: &BTreeSet<String>) -> Result<()> {
        let storage = self.state.storage();
        match list {
            SourceList::Trusted => storage.set_trusted(sources).await?,
            SourceList::Excluded => storage.set_excluded(sources).await?,
        }
        Ok(())
    }

    async fn add(&self, list: SourceList, source: &str) -> Result<String> {
        let source = normalize(source)?;
        let mut engine = self.state.engine().await;

        let (opposite, mut sources) = futures::try_join!(self.fetch(list.opposite()), self.fetch(list))?;
        if opposite.contains(&source) {
            return Err(CoreError::SourceConflict { domain: source });
        }
        if sources.insert(source.clone()) {
            self.store(list, &sources).await?;
        }

        match list {
            SourceList::Trusted => engine.add_trusted_source(&source).await?,
            SourceList::Excluded => engine.add_excluded_source(&source).await?,
        }
        self.state.checkpoint(&**engine).await?;

        info!("Added {:?} source {}", list, source);
        Ok(source)
    }

    async fn remove(&self, list: SourceList, source: &str) -> Result<String> {
        let source = normalize(source)?;
        let mut engine = self.state.engine().await;

        let mut sources = self.fetch(list).await?;
        if !sources.remove(&source) {
            debug!("{:?} sources don't contain {}", list, source);
            return Ok(source);
        }
        self.store(list, &sources).await?;

        match list {
            SourceList::Trusted => engine.remove_trusted_source(&source).await?,
            SourceList::Excluded => engine.remove_excluded_source(&source).await?,
        }
        self.state.checkpoint(&**engine).await?;

        info!("Removed {:?} source {}", list, source);
        Ok(source)
    }
}
