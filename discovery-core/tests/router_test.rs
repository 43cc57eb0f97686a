use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use discovery_core::{
    ClientEvent, CoreConfig, CoreError, DiscoveryEngine, EngineEvent, EngineExceptionReason, FeedFailureReason, SearchBy,
    SearchFailureReason, SourceFailureReason, SqliteStore, UserReaction, ViewMode,
};
use interfaces::baseline::BaselineFactory;

mod common;
use common::{setup_engine, Reply, Script, ScriptedFactory};

async fn baseline_engine() -> Result<DiscoveryEngine> {
    let _ = tracing_subscriber::fmt::try_init();
    let storage = Arc::new(SqliteStore::in_memory().await?);
    let engine = DiscoveryEngine::new();
    engine
        .init(&CoreConfig::default(), &BaselineFactory::with_sample_corpus(), storage, None)
        .await?;
    Ok(engine)
}

#[tokio::test]
async fn test_requests_before_init_are_rejected() -> Result<()> {
    let engine = DiscoveryEngine::new();

    let outcome = engine.handle(ClientEvent::NextFeedBatchRequested).await;

    assert_eq!(
        outcome,
        EngineEvent::exception(EngineExceptionReason::EngineNotReady, "engine is not initialized")
    );
    Ok(())
}

#[tokio::test]
async fn test_requests_after_dispose_are_rejected() -> Result<()> {
    let (engine, _) = setup_engine(Arc::new(Script::default())).await?;
    assert!(engine.is_ready().await);

    engine.dispose().await;

    match engine.handle(ClientEvent::TrustedSourcesListRequested).await {
        EngineEvent::EngineExceptionRaised { reason, .. } => assert_eq!(reason, EngineExceptionReason::EngineDisposed),
        other => panic!("unexpected outcome {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_disposed_engine_cannot_be_initialized_again() -> Result<()> {
    let script = Arc::new(Script::default());
    let (engine, _) = setup_engine(script.clone()).await?;
    engine.dispose().await;

    let storage = Arc::new(SqliteStore::in_memory().await?);
    let result = engine
        .init(&CoreConfig::default(), &ScriptedFactory { script: script.clone() }, storage, None)
        .await;

    assert!(matches!(result, Err(CoreError::Disposed)));
    assert!(!engine.is_ready().await);
    assert_eq!(script.init_payloads.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failures_are_typed() -> Result<()> {
    let script = Arc::new(Script::default());
    let (engine, _) = setup_engine(script.clone()).await?;

    assert_eq!(
        engine.handle(ClientEvent::NextFeedBatchRequested).await,
        EngineEvent::NextFeedBatchRequestFailed { reason: FeedFailureReason::NoNewsForMarket }
    );

    script.push_feed(Reply::Fail("ranker down".to_string()));
    match engine.handle(ClientEvent::NextFeedBatchRequested).await {
        EngineEvent::NextFeedBatchRequestFailed { reason: FeedFailureReason::StacksOpsError { message } } => {
            assert!(message.contains("ranker down"))
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(
        engine.handle(ClientEvent::ActiveSearchTermRequested).await,
        EngineEvent::ActiveSearchTermRequestFailed { reason: SearchFailureReason::NoActiveSearch }
    );

    let trusted = BTreeSet::from(["both.com".to_string()]);
    assert_eq!(
        engine
            .handle(ClientEvent::SetSourcesRequested { trusted: trusted.clone(), excluded: trusted.clone() })
            .await,
        EngineEvent::SetSourcesRequestFailed {
            reason: SourceFailureReason::DuplicateSources { sources: trusted }
        }
    );

    match engine
        .handle(ClientEvent::TimeSpent { id: discovery_core::DocumentId::new(), view_mode: ViewMode::Web, seconds: -3 })
        .await
    {
        EngineEvent::EngineExceptionRaised { reason, .. } => assert_eq!(reason, EngineExceptionReason::InvalidArgument),
        other => panic!("unexpected outcome {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_source_conflict_event() -> Result<()> {
    let (engine, _) = setup_engine(Arc::new(Script::default())).await?;

    assert_eq!(
        engine.handle(ClientEvent::AddExcludedSourceRequested { source: "spam.com".to_string() }).await,
        EngineEvent::ExcludedSourceAdded { source: "spam.com".to_string() }
    );
    assert_eq!(
        engine.handle(ClientEvent::AddTrustedSourceRequested { source: "spam.com".to_string() }).await,
        EngineEvent::SourceRequestFailed {
            reason: SourceFailureReason::SourceConflict { source: "spam.com".to_string() }
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_baseline_session() -> Result<()> {
    let engine = baseline_engine().await?;

    let batch = match engine.handle(ClientEvent::NextFeedBatchRequested).await {
        EngineEvent::NextFeedBatchRequestSucceeded { items } => items,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(batch.len(), 2);

    let liked = batch[0].id;
    assert_eq!(
        engine.handle(ClientEvent::UserReactionChanged { id: liked, reaction: UserReaction::Positive }).await,
        EngineEvent::ClientEventSucceeded
    );
    match engine.next_notification().await {
        Some(EngineEvent::DocumentsUpdated { items }) => assert_eq!(items[0].id, liked),
        other => panic!("unexpected notification {:?}", other),
    }
    assert!(engine.next_notification().await.is_none());

    assert_eq!(
        engine.handle(ClientEvent::TimeSpent { id: liked, view_mode: ViewMode::Reader, seconds: 30 }).await,
        EngineEvent::ClientEventSucceeded
    );

    match engine.handle(ClientEvent::FeedRequested).await {
        EngineEvent::FeedRequestSucceeded { items } => {
            assert_eq!(items.iter().map(|d| d.id).collect::<Vec<_>>(), batch.iter().map(|d| d.id).collect::<Vec<_>>())
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let search = engine
        .handle(ClientEvent::ActiveSearchRequested { term: "business".to_string(), by: SearchBy::Topic })
        .await;
    match search {
        EngineEvent::ActiveSearchRequestSucceeded { search, items } => {
            assert_eq!(search.search_term, "business");
            assert!(!items.is_empty());
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(
        engine
            .handle(ClientEvent::ActiveSearchRequested { term: "world".to_string(), by: SearchBy::Topic })
            .await,
        EngineEvent::ActiveSearchRequestFailed { reason: SearchFailureReason::OpenActiveSearch }
    );
    assert_eq!(engine.handle(ClientEvent::ActiveSearchClosed).await, EngineEvent::ActiveSearchClosedSucceeded);

    match engine.handle(ClientEvent::TrendingTopicsRequested).await {
        EngineEvent::TrendingTopicsRequestSucceeded { topics } => assert_eq!(topics[0].name, "business"),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(engine.handle(ClientEvent::ResetAi).await, EngineEvent::ResetAiSucceeded);
    Ok(())
}
