use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use interfaces::defs::{ActiveSearch, Embedding, ReactedSource, SearchBy, UserReaction, ViewMode};

mod common;
use common::{sample_document, setup_test_database, SourceKind};

#[tokio::test]
async fn test_fresh_store_is_empty() -> Result<()> {
    let db = setup_test_database().await?;

    assert!(db.is_empty().await?);
    assert!(db.read_snapshot().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_snapshot_contains_every_entity_class() -> Result<()> {
    let db = setup_test_database().await?;

    let liked = sample_document(0, UserReaction::Positive, true);
    let inactive = sample_document(1, UserReaction::Negative, false);
    db.insert_document(&liked, Some(&Embedding(vec![0.5, 0.5]))).await?;
    db.insert_document(&inactive, None).await?;
    db.insert_view_time(liked.id, ViewMode::Story, Duration::from_secs(5)).await?;
    db.insert_view_time(liked.id, ViewMode::Story, Duration::from_secs(7)).await?;
    db.insert_view_time(liked.id, ViewMode::Web, Duration::from_secs(3)).await?;
    db.insert_reacted_source(&ReactedSource {
        source: "example.com".to_string(),
        liked: true,
        last_reacted: Utc::now(),
    })
    .await?;
    db.insert_source_preference("trusted.org", SourceKind::Trusted).await?;
    db.insert_source_preference("spam.net", SourceKind::Excluded).await?;
    db.insert_search(&ActiveSearch {
        search_term: "rust".to_string(),
        search_by: SearchBy::Query,
        page_number: 2,
        page_size: 10,
    })
    .await?;
    db.insert_engine_state(b"previous engine").await?;

    assert!(!db.is_empty().await?);
    let snapshot = db.read_snapshot().await?.expect("snapshot should exist");

    assert_eq!(snapshot.documents.len(), 2);
    let migrated = &snapshot.documents[0];
    assert_eq!(migrated.document, liked);
    assert_eq!(migrated.embedding, Some(Embedding(vec![0.5, 0.5])));
    assert_eq!(migrated.view_time.get(&ViewMode::Story), Some(&Duration::from_secs(12)));
    assert_eq!(migrated.view_time.get(&ViewMode::Web), Some(&Duration::from_secs(3)));
    assert_eq!(snapshot.documents[1].document, inactive);
    assert!(snapshot.documents[1].embedding.is_none());

    assert_eq!(snapshot.reacted_sources.len(), 1);
    assert!(snapshot.trusted_sources.contains("trusted.org"));
    assert!(snapshot.excluded_sources.contains("spam.net"));
    assert_eq!(snapshot.search.as_ref().map(|s| s.page_number), Some(2));
    assert_eq!(snapshot.engine_state.as_deref(), Some(&b"previous engine"[..]));
    Ok(())
}

#[tokio::test]
async fn test_clear_all_empties_the_store() -> Result<()> {
    let db = setup_test_database().await?;

    db.insert_document(&sample_document(0, UserReaction::Neutral, true), None).await?;
    db.insert_source_preference("trusted.org", SourceKind::Trusted).await?;
    db.insert_engine_state(b"state").await?;

    tokio_test::assert_ok!(db.clear_all().await);

    assert!(db.is_empty().await?);
    assert!(db.read_snapshot().await?.is_none());
    Ok(())
}
