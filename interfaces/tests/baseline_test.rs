use std::collections::BTreeSet;

use chrono::Utc;
use interfaces::baseline::BaselineFactory;
use interfaces::defs::{
    Document, EngineError, EngineFactory, EngineInitConfig, Market, MigrationData, MigrationDocument, StackId,
    UserReaction,
};

fn config() -> EngineInitConfig {
    EngineInitConfig {
        markets: vec![Market::new("en", "US")],
        ..EngineInitConfig::default()
    }
}

#[tokio::test]
async fn test_feed_never_repeats_documents() {
    let factory = BaselineFactory::with_sample_corpus();
    let mut engine = factory.initialize(&config(), None, None).await.unwrap();

    let first = engine.feed_next_batch(&[], 4).await.unwrap();
    let second = engine.feed_next_batch(&[], 4).await.unwrap();

    assert_eq!(first.len(), 4);
    assert_eq!(second.len(), 4);
    let urls = first.iter().chain(second.iter()).map(|doc| doc.resource.url.clone()).collect::<BTreeSet<_>>();
    assert_eq!(urls.len(), 8);
}

#[tokio::test]
async fn test_excluded_sources_are_filtered() {
    let factory = BaselineFactory::with_sample_corpus();
    let mut engine = factory.initialize(&config(), None, None).await.unwrap();
    engine.add_excluded_source("reuters.com").await.unwrap();

    let batch = engine.feed_next_batch(&[], 100).await.unwrap();

    assert_eq!(batch.len(), factory.corpus().len() - 2);
    assert!(batch.iter().all(|doc| doc.resource.source_domain != "reuters.com"));
}

#[tokio::test]
async fn test_search_pages_and_blank_terms() {
    let factory = BaselineFactory::with_sample_corpus();
    let mut engine = factory.initialize(&config(), None, None).await.unwrap();

    let first = engine.search_by_topic("business", 1, 2).await.unwrap();
    let second = engine.search_by_topic("business", 2, 2).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 1);
    assert!(first.iter().all(|doc| doc.stack_id.is_nil()));

    assert!(matches!(engine.search_by_query("  ", 1, 2).await, Err(EngineError::InvalidTerm)));
}

#[tokio::test]
async fn test_deep_search_rejects_unknown_market() {
    let factory = BaselineFactory::with_sample_corpus();
    let engine = factory.initialize(&config(), None, None).await.unwrap();

    let result = engine.deep_search("galaxy", &Market::new("de", "DE"), None).await;

    match result {
        Err(err) => assert!(err.to_string().contains("unsupported market")),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn test_checkpoint_restores_sources() {
    let factory = BaselineFactory::with_sample_corpus();
    let mut engine = factory.initialize(&config(), None, None).await.unwrap();
    engine.add_trusted_source("bbc.com").await.unwrap();
    let checkpoint = engine.serialize_state().await.unwrap();

    let restored = factory.initialize(&config(), None, Some(checkpoint)).await.unwrap();

    assert!(restored.trusted_sources().await.unwrap().contains("bbc.com"));
}

#[tokio::test]
async fn test_migration_is_idempotent() {
    let factory = BaselineFactory::with_sample_corpus();
    let resource = factory.corpus()[0].clone();
    let migration = MigrationData {
        trusted_sources: BTreeSet::from(["ft.com".to_string()]),
        documents: vec![MigrationDocument {
            document: Document {
                id: Default::default(),
                stack_id: StackId::nil(),
                resource,
                user_reaction: UserReaction::Positive,
                is_active: false,
                is_searched: false,
                batch_index: 0,
                timestamp: Utc::now(),
            },
            embedding: None,
            view_time: Default::default(),
        }],
        ..MigrationData::default()
    };

    let once = factory.initialize(&config(), Some(migration.clone()), None).await.unwrap();
    let state = once.serialize_state().await.unwrap();
    let twice = factory.initialize(&config(), Some(migration), Some(state.clone())).await.unwrap();

    assert_eq!(twice.serialize_state().await.unwrap(), state);
    assert!(twice.trusted_sources().await.unwrap().contains("ft.com"));
}
