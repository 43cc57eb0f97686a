use std::sync::Arc;

use legacy_store::LegacyDatabase;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use crate::config::CoreConfig;
use crate::document_manager::DocumentManager;
use crate::feed_manager::FeedManager;
use crate::migration;
use crate::search_manager::SearchManager;
use crate::source_manager::SourceManager;
use crate::state::EngineState;
use crate::storage::SqliteStore;
use crate::types::{
    ClientEvent, CoreError, DocumentFilter, EngineEvent, EngineExceptionReason, EngineFactory, FeedFailureReason,
    Result, SearchFailureReason, SourceFailureReason, Storage,
};

struct Managers {
    state: Arc<EngineState>,
    documents: DocumentManager,
    feed: FeedManager,
    search: SearchManager,
    sources: SourceManager,
}

enum EngineLifecycle {
    Uninitialized,
    Ready(Box<Managers>),
    Disposed,
}

fn feed_failure(err: CoreError) -> FeedFailureReason {
    match err {
        CoreError::NoNewsForMarket => FeedFailureReason::NoNewsForMarket,
        CoreError::Store(err) => FeedFailureReason::DbError { message: err.to_string() },
        err => FeedFailureReason::StacksOpsError { message: err.to_string() },
    }
}

fn search_failure(err: CoreError) -> SearchFailureReason {
    match err {
        CoreError::NoActiveSearch => SearchFailureReason::NoActiveSearch,
        CoreError::OpenActiveSearch => SearchFailureReason::OpenActiveSearch,
        CoreError::NoResultsAvailable => SearchFailureReason::NoResultsAvailable,
        CoreError::InvalidArgument(_) => SearchFailureReason::InvalidTerm,
        CoreError::NotActive { .. } => SearchFailureReason::DocumentNotActive,
        CoreError::Store(err) => SearchFailureReason::DbError { message: err.to_string() },
        err => SearchFailureReason::EngineError { message: err.to_string() },
    }
}

/// Errors without a dedicated source failure fall through to an exception.
fn source_failure(err: CoreError) -> std::result::Result<SourceFailureReason, CoreError> {
    match err {
        CoreError::DuplicateSources(sources) => Ok(SourceFailureReason::DuplicateSources { sources }),
        CoreError::SourceConflict { domain } => Ok(SourceFailureReason::SourceConflict { source: domain }),
        CoreError::InvalidArgument(_) => Ok(SourceFailureReason::InvalidSource),
        CoreError::NoResultsAvailable => Ok(SourceFailureReason::NoResultsAvailable),
        err => Err(err),
    }
}

fn source_event(result: Result<String>, succeeded: impl FnOnce(String) -> EngineEvent) -> EngineEvent {
    match result {
        Ok(source) => succeeded(source),
        Err(err) => match source_failure(err) {
            Ok(reason) => EngineEvent::SourceRequestFailed { reason },
            Err(err) => err.into(),
        },
    }
}

/// Entry point of the discovery engine: routes client events to the managers.
pub struct DiscoveryEngine {
    lifecycle: RwLock<EngineLifecycle>,
    notification_sender: mpsc::UnboundedSender<EngineEvent>,
    notification_receiver: Arc<RwLock<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryEngine {
    pub fn new() -> Self {
        let (notification_sender, notification_receiver) = mpsc::unbounded_channel();
        Self {
            lifecycle: RwLock::new(EngineLifecycle::Uninitialized),
            notification_sender,
            notification_receiver: Arc::new(RwLock::new(notification_receiver)),
        }
    }

    /// Opens the stores named in `config` and initializes the engine.
    pub async fn open(config: &CoreConfig, factory: &dyn EngineFactory) -> Result<Self> {
        let storage = Arc::new(SqliteStore::new(&config.database_url).await?);
        let legacy = match &config.legacy_database_url {
            Some(url) => Some(
                LegacyDatabase::open(url)
                    .await
                    .map_err(|err| CoreError::Migration(format!("opening legacy store: {}", err)))?,
            ),
            None => None,
        };
        let engine = Self::new();
        engine.init(config, factory, storage, legacy.as_ref()).await?;
        Ok(engine)
    }

    /// Runs the legacy migration and makes the engine ready.
    ///
    /// A disposed engine can't be initialized again, use a new one instead.
    pub async fn init(
        &self,
        config: &CoreConfig,
        factory: &dyn EngineFactory,
        storage: Arc<dyn Storage>,
        legacy: Option<&LegacyDatabase>,
    ) -> Result<()> {
        let mut lifecycle = self.lifecycle.write().await;
        match *lifecycle {
            EngineLifecycle::Ready(_) => {
                warn!("Discovery engine is already initialized");
                return Ok(());
            }
            EngineLifecycle::Disposed => {
                warn!("Refusing to initialize a disposed discovery engine");
                return Err(CoreError::Disposed);
            }
            EngineLifecycle::Uninitialized => {}
        }

        let engine = migration::initialize_engine(factory, &config.engine_init_config(), legacy, storage.as_ref())
            .await
            .map_err(|err| {
                error!("Discovery engine initialization failed: {}", err);
                err
            })?;
        let last_batch = storage
            .fetch_documents(DocumentFilter::all())
            .await?
            .iter()
            .map(|document| document.timestamp)
            .max();

        let state = Arc::new(EngineState::new(engine, storage, last_batch));
        *lifecycle = EngineLifecycle::Ready(Box::new(Managers {
            documents: DocumentManager::new(state.clone(), self.notification_sender.clone()),
            feed: FeedManager::new(state.clone(), config.max_feed_batch_size),
            search: SearchManager::new(state.clone(), config.search_page_size),
            sources: SourceManager::new(state.clone()),
            state,
        }));
        info!("Discovery engine ready");
        Ok(())
    }

    /// Drops the engine. Every later request is answered with `EngineDisposed`.
    pub async fn dispose(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        *lifecycle = EngineLifecycle::Disposed;
        info!("Discovery engine disposed");
    }

    pub async fn is_ready(&self) -> bool {
        matches!(*self.lifecycle.read().await, EngineLifecycle::Ready(_))
    }

    /// Next pending notification, if any.
    pub async fn next_notification(&self) -> Option<EngineEvent> {
        let mut receiver = self.notification_receiver.write().await;
        receiver.try_recv().ok()
    }

    pub async fn handle(&self, event: ClientEvent) -> EngineEvent {
        let lifecycle = self.lifecycle.read().await;
        match &*lifecycle {
            EngineLifecycle::Ready(managers) => Self::dispatch(managers, event).await,
            EngineLifecycle::Uninitialized => {
                EngineEvent::exception(EngineExceptionReason::EngineNotReady, "engine is not initialized")
            }
            EngineLifecycle::Disposed => {
                EngineEvent::exception(EngineExceptionReason::EngineDisposed, "engine has been disposed")
            }
        }
    }

    async fn dispatch(managers: &Managers, event: ClientEvent) -> EngineEvent {
        match event {
            ClientEvent::ConfigurationChanged { markets, max_batch_size } => {
                match managers.feed.change_configuration(markets, max_batch_size).await {
                    Ok(()) => EngineEvent::ClientEventSucceeded,
                    Err(err) => err.into(),
                }
            }
            ClientEvent::FeedRequested => match managers.feed.restore().await {
                Ok(items) => EngineEvent::FeedRequestSucceeded { items },
                Err(err) => EngineEvent::FeedRequestFailed { reason: feed_failure(err) },
            },
            ClientEvent::NextFeedBatchRequested => match managers.feed.next_batch().await {
                Ok(items) => EngineEvent::NextFeedBatchRequestSucceeded { items },
                Err(err) => EngineEvent::NextFeedBatchRequestFailed { reason: feed_failure(err) },
            },
            ClientEvent::FeedDocumentsClosed { ids } => match managers.documents.deactivate_documents(&ids).await {
                Ok(()) => EngineEvent::ClientEventSucceeded,
                Err(err) => err.into(),
            },
            ClientEvent::UserReactionChanged { id, reaction } => {
                match managers.documents.set_user_reaction(id, reaction).await {
                    Ok(_) => EngineEvent::ClientEventSucceeded,
                    Err(err) => err.into(),
                }
            }
            ClientEvent::TimeSpent { id, view_mode, seconds } => {
                match managers.documents.log_view_time(id, view_mode, seconds).await {
                    Ok(()) => EngineEvent::ClientEventSucceeded,
                    Err(err) => err.into(),
                }
            }
            ClientEvent::ActiveSearchRequested { term, by } => match managers.search.open(&term, by).await {
                Ok((search, items)) => EngineEvent::ActiveSearchRequestSucceeded { search, items },
                Err(err) => EngineEvent::ActiveSearchRequestFailed { reason: search_failure(err) },
            },
            ClientEvent::NextActiveSearchBatchRequested => match managers.search.next_batch().await {
                Ok((search, items)) => EngineEvent::NextActiveSearchBatchRequestSucceeded { search, items },
                Err(err) => EngineEvent::NextActiveSearchBatchRequestFailed { reason: search_failure(err) },
            },
            ClientEvent::RestoreActiveSearchRequested => match managers.search.restore().await {
                Ok((search, items)) => EngineEvent::RestoreActiveSearchSucceeded { search, items },
                Err(err) => EngineEvent::RestoreActiveSearchFailed { reason: search_failure(err) },
            },
            ClientEvent::ActiveSearchTermRequested => match managers.search.term().await {
                Ok(search_term) => EngineEvent::ActiveSearchTermRequestSucceeded { search_term },
                Err(err) => EngineEvent::ActiveSearchTermRequestFailed { reason: search_failure(err) },
            },
            ClientEvent::ActiveSearchClosed => match managers.search.close().await {
                Ok(()) => EngineEvent::ActiveSearchClosedSucceeded,
                Err(err) => EngineEvent::ActiveSearchClosedFailed { reason: search_failure(err) },
            },
            ClientEvent::DeepSearchRequested { term, market } => match managers.search.deep_search(&term, &market).await {
                Ok(items) => EngineEvent::DeepSearchRequestSucceeded { items },
                Err(err) => EngineEvent::DeepSearchRequestFailed { reason: search_failure(err) },
            },
            ClientEvent::DeepSearchByIdRequested { id } => match managers.search.deep_search_by_id(id).await {
                Ok(items) => EngineEvent::DeepSearchRequestSucceeded { items },
                Err(err) => EngineEvent::DeepSearchRequestFailed { reason: search_failure(err) },
            },
            ClientEvent::TrendingTopicsRequested => match managers.search.trending_topics().await {
                Ok(topics) => EngineEvent::TrendingTopicsRequestSucceeded { topics },
                Err(err) => EngineEvent::TrendingTopicsRequestFailed { reason: search_failure(err) },
            },
            ClientEvent::SetSourcesRequested { trusted, excluded } => {
                match managers.sources.set_sources(trusted.clone(), excluded.clone()).await {
                    Ok(()) => EngineEvent::SetSourcesRequestSucceeded { trusted, excluded },
                    Err(err) => match source_failure(err) {
                        Ok(reason) => EngineEvent::SetSourcesRequestFailed { reason },
                        Err(err) => err.into(),
                    },
                }
            }
            ClientEvent::AddTrustedSourceRequested { source } => source_event(
                managers.sources.add_trusted(&source).await,
                |source| EngineEvent::TrustedSourceAdded { source },
            ),
            ClientEvent::RemoveTrustedSourceRequested { source } => source_event(
                managers.sources.remove_trusted(&source).await,
                |source| EngineEvent::TrustedSourceRemoved { source },
            ),
            ClientEvent::AddExcludedSourceRequested { source } => source_event(
                managers.sources.add_excluded(&source).await,
                |source| EngineEvent::ExcludedSourceAdded { source },
            ),
            ClientEvent::RemoveExcludedSourceRequested { source } => source_event(
                managers.sources.remove_excluded(&source).await,
                |source| EngineEvent::ExcludedSourceRemoved { source },
            ),
            ClientEvent::TrustedSourcesListRequested => match managers.sources.trusted_sources().await {
                Ok(sources) => EngineEvent::TrustedSourcesListRequestSucceeded { sources },
                Err(err) => err.into(),
            },
            ClientEvent::ExcludedSourcesListRequested => match managers.sources.excluded_sources().await {
                Ok(sources) => EngineEvent::ExcludedSourcesListRequestSucceeded { sources },
                Err(err) => err.into(),
            },
            ClientEvent::AvailableSourcesListRequested { fuzzy_term } => {
                match managers.sources.search_available_sources(&fuzzy_term) {
                    Ok(sources) => EngineEvent::AvailableSourcesListRequestSucceeded { sources },
                    Err(err) => match source_failure(err) {
                        Ok(reason) => EngineEvent::AvailableSourcesListRequestFailed { reason },
                        Err(err) => err.into(),
                    },
                }
            }
            ClientEvent::ResetAi => match Self::reset_ai(managers).await {
                Ok(()) => EngineEvent::ResetAiSucceeded,
                Err(err) => err.into(),
            },
        }
    }

    async fn reset_ai(managers: &Managers) -> Result<()> {
        let mut engine = managers.state.engine().await;
        engine.reset_ai().await?;
        managers.state.checkpoint(&**engine).await?;
        info!("Engine forgot what it learned about the user");
        Ok(())
    }
}
