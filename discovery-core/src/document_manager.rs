use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::state::EngineState;
use crate::types::{
    ActiveData, CoreError, Document, DocumentId, DocumentTransition, EngineEvent, ReactedSource, ReactionEvent, Result,
    TimeSpentEvent, UserReaction, ViewMode,
};

/// Reactions, view time and deactivation of single documents.
pub struct DocumentManager {
    state: Arc<EngineState>,
    notifications: mpsc::UnboundedSender<EngineEvent>,
}

impl DocumentManager {
    pub fn new(state: Arc<EngineState>, notifications: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { state, notifications }
    }

    /// The document and its active data, or `NotActive`.
    pub async fn active_document(&self, id: DocumentId) -> Result<(Document, ActiveData)> {
        let storage = self.state.storage();
        let document = storage
            .fetch_document(id)
            .await?
            .filter(|document| document.is_active)
            .ok_or(CoreError::NotActive { id })?;
        let active_data = storage.fetch_active_data(id).await?.ok_or(CoreError::NotActive { id })?;
        Ok((document, active_data))
    }

    pub async fn set_user_reaction(&self, id: DocumentId, reaction: UserReaction) -> Result<Document> {
        let mut engine = self.state.engine().await;
        let (document, active_data) = self.active_document(id).await?;
        let storage = self.state.storage();

        if reaction != UserReaction::Neutral {
            self.update_reacted_source(&document.resource.source_domain, reaction).await?;
        }
        let document = storage
            .transition_document(id, DocumentTransition::React(reaction))
            .await?
            .ok_or(CoreError::NotActive { id })?;

        let history = match reaction {
            UserReaction::Positive => Some(self.state.history().await?),
            _ => None,
        };
        let reacted_sources = storage.fetch_reacted_sources().await?;
        let event = ReactionEvent {
            id,
            stack_id: document.stack_id,
            title: document.resource.title.clone(),
            snippet: document.resource.snippet.clone(),
            embedding: active_data.embedding,
            reaction,
            market: document.resource.market.clone(),
        };
        engine.ingest_reaction(history.as_deref(), &reacted_sources, &event).await?;
        self.state.checkpoint(&**engine).await?;

        info!("User reacted {} to document {}", reaction, id);
        if self
            .notifications
            .send(EngineEvent::DocumentsUpdated { items: vec![document.clone()] })
            .is_err()
        {
            debug!("No listener for document updates");
        }
        Ok(document)
    }

    async fn update_reacted_source(&self, source: &str, reaction: UserReaction) -> Result<()> {
        let storage = self.state.storage();
        let liked = reaction == UserReaction::Positive;
        match storage.fetch_reacted_source(source).await? {
            None => {
                storage
                    .upsert_reacted_source(&ReactedSource {
                        source: source.to_string(),
                        liked,
                        last_reacted: Utc::now(),
                    })
                    .await?;
            }
            Some(existing) if existing.liked != liked => {
                debug!("Reaction to {} flipped, forgetting the source", source);
                storage.delete_reacted_source(source).await?;
            }
            Some(existing) => {
                storage
                    .upsert_reacted_source(&ReactedSource {
                        last_reacted: Utc::now(),
                        ..existing
                    })
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn log_view_time(&self, id: DocumentId, mode: ViewMode, seconds: i64) -> Result<()> {
        if seconds < 0 {
            return Err(CoreError::InvalidArgument(format!("negative view time: {}", seconds)));
        }

        let mut engine = self.state.engine().await;
        let (document, mut active_data) = self.active_document(id).await?;
        active_data.add_view_time(mode, Duration::from_secs(seconds as u64));
        self.state.storage().upsert_active_data(id, &active_data).await?;

        let event = TimeSpentEvent {
            id,
            view_time: active_data.total_view_time(),
            embedding: active_data.embedding,
            reaction: document.user_reaction,
        };
        engine.ingest_time_spent(&event).await?;
        self.state.checkpoint(&**engine).await?;

        debug!("Logged {}s of {} view time for document {}", seconds, mode.as_str(), id);
        Ok(())
    }

    /// Retires documents, unknown ids are ignored.
    pub async fn deactivate_documents(&self, ids: &[DocumentId]) -> Result<()> {
        let _engine = self.state.engine().await;
        self.state.storage().deactivate_documents(ids).await?;
        info!("Deactivated {} documents", ids.len());
        Ok(())
    }
}
