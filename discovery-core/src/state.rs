use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::types::{
    ActiveData, Document, DocumentFilter, EngineDocument, HistoricDocument, RankingEngine, Result, Storage,
    UserReaction,
};

/// The ranking engine together with everything needed to persist it.
///
/// Engine calls are serialized through the mutex. Callers keep the guard for the
/// whole read-modify-write so the checkpoint always matches the store.
pub struct EngineState {
    engine: Mutex<Box<dyn RankingEngine>>,
    storage: Arc<dyn Storage>,
    last_batch: Mutex<Option<DateTime<Utc>>>,
}

impl EngineState {
    pub fn new(engine: Box<dyn RankingEngine>, storage: Arc<dyn Storage>, last_batch: Option<DateTime<Utc>>) -> Self {
        Self {
            engine: Mutex::new(engine),
            storage,
            last_batch: Mutex::new(last_batch),
        }
    }

    pub async fn engine(&self) -> MutexGuard<'_, Box<dyn RankingEngine>> {
        self.engine.lock().await
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Overwrites the stored checkpoint with the current engine state.
    pub async fn checkpoint(&self, engine: &dyn RankingEngine) -> Result<()> {
        let state = engine.serialize_state().await?;
        self.storage.store_checkpoint(&state).await?;
        debug!("Checkpointed engine state of {} bytes", state.len());
        Ok(())
    }

    /// Every stored document, in the form the engine uses to avoid duplicates.
    pub async fn history(&self) -> Result<Vec<HistoricDocument>> {
        let documents = self.storage.fetch_documents(DocumentFilter::all()).await?;
        Ok(documents.iter().map(Document::historic).collect())
    }

    /// Timestamp for the next batch, strictly later than any batch before.
    pub async fn next_batch_timestamp(&self) -> DateTime<Utc> {
        let mut last_batch = self.last_batch.lock().await;
        let now = Utc::now();
        let now = DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now);
        let next = match *last_batch {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        };
        *last_batch = Some(next);
        next
    }
}

/// Turns engine output into fresh active documents of one batch.
pub fn into_batch(documents: Vec<EngineDocument>, is_searched: bool, timestamp: DateTime<Utc>) -> Vec<(Document, ActiveData)> {
    documents
        .into_iter()
        .enumerate()
        .map(|(index, document)| {
            let active_data = ActiveData::new(document.embedding);
            let document = Document {
                id: document.id,
                stack_id: document.stack_id,
                resource: document.resource,
                user_reaction: UserReaction::Neutral,
                is_active: true,
                is_searched,
                batch_index: index as u32,
                timestamp,
            };
            (document, active_data)
        })
        .collect()
}

/// Sorts documents the way they were delivered.
pub fn sort_delivered(documents: &mut [Document]) {
    documents.sort_by_key(Document::order_key);
}
