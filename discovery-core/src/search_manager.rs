use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::state::{into_batch, sort_delivered, EngineState};
use crate::types::{
    ActiveSearch, CoreError, Document, DocumentFilter, DocumentId, Embedding, EngineDocument, EngineError, Market,
    RankingEngine, Result, SearchBy, StoreError, TrendingTopic, UserReaction,
};

/// Engine error messages which mean "nothing found" rather than a failure.
const NO_RESULT_MARKERS: [&str; 3] = ["invalid search term", "no similar documents", "unsupported market"];

fn is_no_results(err: &EngineError) -> bool {
    let message = err.to_string().to_lowercase();
    NO_RESULT_MARKERS.iter().any(|marker| message.contains(marker))
}

async fn fetch_page(engine: &mut dyn RankingEngine, search: &ActiveSearch, page: u32) -> Result<Vec<EngineDocument>> {
    let documents = match search.search_by {
        SearchBy::Query => engine.search_by_query(&search.search_term, page, search.page_size).await?,
        SearchBy::Topic => engine.search_by_topic(&search.search_term, page, search.page_size).await?,
    };
    Ok(documents)
}

/// The single active search plus the one-shot searches.
pub struct SearchManager {
    state: Arc<EngineState>,
    page_size: u32,
}

impl SearchManager {
    pub fn new(state: Arc<EngineState>, page_size: u32) -> Self {
        Self { state, page_size }
    }

    pub async fn open(&self, term: &str, by: SearchBy) -> Result<(ActiveSearch, Vec<Document>)> {
        let term = term.trim();
        if term.is_empty() {
            return Err(CoreError::InvalidArgument("search term must not be blank".to_string()));
        }

        let mut engine = self.state.engine().await;
        let storage = self.state.storage();
        if storage.fetch_search().await?.is_some() {
            return Err(CoreError::OpenActiveSearch);
        }

        let search = ActiveSearch {
            search_term: term.to_string(),
            search_by: by,
            page_number: 1,
            page_size: self.page_size,
        };
        let documents = fetch_page(&mut **engine, &search, 1).await?;
        let timestamp = self.state.next_batch_timestamp().await;
        let batch = into_batch(documents, true, timestamp);
        match storage.store_new_search(&search, &batch).await {
            Err(StoreError::Conflict(_)) => return Err(CoreError::OpenActiveSearch),
            other => other?,
        }
        self.state.checkpoint(&**engine).await?;

        info!("Opened {} search for '{}' with {} results", by, search.search_term, batch.len());
        Ok((search, batch.into_iter().map(|(document, _)| document).collect()))
    }

    pub async fn next_batch(&self) -> Result<(ActiveSearch, Vec<Document>)> {
        let mut engine = self.state.engine().await;
        let storage = self.state.storage();
        let mut search = storage.fetch_search().await?.ok_or(CoreError::NoActiveSearch)?;

        let page = search.page_number + 1;
        let documents = fetch_page(&mut **engine, &search, page).await?;
        let timestamp = self.state.next_batch_timestamp().await;
        let batch = into_batch(documents, true, timestamp);
        storage.store_next_page(page, &batch).await?;
        self.state.checkpoint(&**engine).await?;

        search.page_number = page;
        debug!("Fetched page {} of search '{}'", page, search.search_term);
        Ok((search, batch.into_iter().map(|(document, _)| document).collect()))
    }

    pub async fn restore(&self) -> Result<(ActiveSearch, Vec<Document>)> {
        let storage = self.state.storage();
        let search = storage.fetch_search().await?.ok_or(CoreError::NoActiveSearch)?;
        let mut documents = storage.fetch_documents(DocumentFilter::search()).await?;
        if documents.is_empty() {
            return Err(CoreError::NoResultsAvailable);
        }
        sort_delivered(&mut documents);
        Ok((search, documents))
    }

    pub async fn term(&self) -> Result<String> {
        let search = self.state.storage().fetch_search().await?.ok_or(CoreError::NoActiveSearch)?;
        Ok(search.search_term)
    }

    /// Keeps reacted search results as history and drops the rest.
    pub async fn close(&self) -> Result<()> {
        let mut engine = self.state.engine().await;
        let storage = self.state.storage();
        if storage.fetch_search().await?.is_none() {
            debug!("No search to close");
            return Ok(());
        }

        let (keep, delete): (Vec<Document>, Vec<Document>) = storage
            .fetch_documents(DocumentFilter::search())
            .await?
            .into_iter()
            .partition(|document| document.user_reaction != UserReaction::Neutral);
        let keep = keep.iter().map(|document| document.id).collect::<Vec<DocumentId>>();
        let delete = delete.iter().map(|document| document.id).collect::<Vec<DocumentId>>();
        storage.close_search(&keep, &delete).await?;

        engine.close_search().await?;
        self.state.checkpoint(&**engine).await?;

        info!("Closed search, kept {} and dropped {} documents", keep.len(), delete.len());
        Ok(())
    }

    pub async fn deep_search(&self, term: &str, market: &Market) -> Result<Vec<EngineDocument>> {
        self.search_similar(term, market, None).await
    }

    /// Searches for documents similar to an active one.
    pub async fn deep_search_by_id(&self, id: DocumentId) -> Result<Vec<EngineDocument>> {
        let storage = self.state.storage();
        let document = storage
            .fetch_document(id)
            .await?
            .filter(|document| document.is_active)
            .ok_or(CoreError::NotActive { id })?;
        let active_data = storage.fetch_active_data(id).await?.ok_or(CoreError::NotActive { id })?;

        let term = document.resource.snippet_or_title();
        self.search_similar(term, &document.resource.market, Some(&active_data.embedding)).await
    }

    async fn search_similar(&self, term: &str, market: &Market, embedding: Option<&Embedding>) -> Result<Vec<EngineDocument>> {
        let engine = self.state.engine().await;
        match engine.deep_search(term, market, embedding).await {
            Ok(documents) if documents.is_empty() => Err(CoreError::NoResultsAvailable),
            Ok(documents) => Ok(documents),
            Err(err) if is_no_results(&err) => {
                debug!("Deep search found nothing: {}", err);
                Err(CoreError::NoResultsAvailable)
            }
            Err(err) => {
                warn!("Deep search failed: {}", err);
                Err(err.into())
            }
        }
    }

    pub async fn trending_topics(&self) -> Result<Vec<TrendingTopic>> {
        let mut engine = self.state.engine().await;
        let topics = engine.trending_topics().await?;
        self.state.checkpoint(&**engine).await?;
        if topics.is_empty() {
            return Err(CoreError::NoResultsAvailable);
        }
        Ok(topics)
    }
}
