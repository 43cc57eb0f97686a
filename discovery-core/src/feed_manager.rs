use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::state::{into_batch, sort_delivered, EngineState};
use crate::types::{CoreError, Document, DocumentFilter, Market, Result};

/// The feed session: batches of ranked documents.
pub struct FeedManager {
    state: Arc<EngineState>,
    max_batch_size: RwLock<u32>,
}

impl FeedManager {
    pub fn new(state: Arc<EngineState>, max_batch_size: u32) -> Self {
        Self {
            state,
            max_batch_size: RwLock::new(max_batch_size),
        }
    }

    pub async fn max_batch_size(&self) -> u32 {
        *self.max_batch_size.read().await
    }

    pub async fn next_batch(&self) -> Result<Vec<Document>> {
        let max_batch_size = self.max_batch_size().await as usize;
        let mut engine = self.state.engine().await;
        let history = self.state.history().await?;

        let documents = engine.feed_next_batch(&history, max_batch_size).await?;
        if documents.is_empty() {
            warn!("Engine returned an empty feed batch");
            return Err(CoreError::NoNewsForMarket);
        }

        let timestamp = self.state.next_batch_timestamp().await;
        let batch = into_batch(documents, false, timestamp);
        self.state.storage().store_batch(&batch).await?;
        self.state.checkpoint(&**engine).await?;

        info!("Delivered feed batch of {} documents", batch.len());
        Ok(batch.into_iter().map(|(document, _)| document).collect())
    }

    /// Active feed documents in the order they were delivered.
    pub async fn restore(&self) -> Result<Vec<Document>> {
        let mut documents = self.state.storage().fetch_documents(DocumentFilter::feed()).await?;
        sort_delivered(&mut documents);
        debug!("Restored {} feed documents", documents.len());
        Ok(documents)
    }

    /// The batch size always applies, even when the engine rejects the markets.
    pub async fn change_configuration(&self, markets: Option<Vec<Market>>, max_batch_size: Option<u32>) -> Result<()> {
        if let Some(max_batch_size) = max_batch_size {
            if max_batch_size == 0 {
                return Err(CoreError::InvalidArgument("max batch size must be positive".to_string()));
            }
            *self.max_batch_size.write().await = max_batch_size;
            info!("Max feed batch size set to {}", max_batch_size);
        }

        if let Some(markets) = markets {
            let mut engine = self.state.engine().await;
            let history = self.state.history().await?;
            info!("Switching feed to markets: {:?}", markets.iter().map(ToString::to_string).collect::<Vec<_>>());
            engine.set_markets(&history, markets).await?;
            self.state.checkpoint(&**engine).await?;
        }
        Ok(())
    }
}
