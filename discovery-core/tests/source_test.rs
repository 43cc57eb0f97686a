use std::collections::BTreeSet;

use anyhow::Result;
use discovery_core::CoreError;
use interfaces::state::SourcePreferenceStore;

mod common;
use common::Harness;

fn set(sources: &[&str]) -> BTreeSet<String> {
    sources.iter().map(|source| source.to_string()).collect()
}

#[tokio::test]
async fn test_set_sources_replaces_both_lists() -> Result<()> {
    let harness = Harness::new().await?;
    tokio_test::assert_ok!(harness.sources.set_sources(set(&["old.com"]), set(&[])).await);

    harness.sources.set_sources(set(&["a.com", "b.com"]), set(&["spam.com"])).await?;

    assert_eq!(harness.storage.fetch_trusted().await?, set(&["a.com", "b.com"]));
    assert_eq!(harness.storage.fetch_excluded().await?, set(&["spam.com"]));
    assert_eq!(harness.sources.trusted_sources().await?, set(&["a.com", "b.com"]));
    assert_eq!(harness.sources.excluded_sources().await?, set(&["spam.com"]));
    assert!(harness.checkpoint().await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_set_sources_rejects_duplicates() -> Result<()> {
    let harness = Harness::new().await?;

    let result = harness
        .sources
        .set_sources(set(&["a.com", "both.com"]), set(&["both.com", "spam.com"]))
        .await;

    match result {
        Err(CoreError::DuplicateSources(duplicates)) => assert_eq!(duplicates, set(&["both.com"])),
        other => panic!("expected duplicate sources, got {:?}", other),
    }
    assert!(harness.storage.fetch_trusted().await?.is_empty());
    assert!(harness.storage.fetch_excluded().await?.is_empty());
    assert!(harness.script.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_excluded_source_cannot_be_trusted() -> Result<()> {
    let harness = Harness::new().await?;
    harness.sources.add_excluded("spam.com").await?;

    let result = harness.sources.add_trusted("spam.com").await;

    assert!(matches!(result, Err(CoreError::SourceConflict { .. })));
    assert!(harness.storage.fetch_trusted().await?.is_empty());
    assert_eq!(harness.storage.fetch_excluded().await?, set(&["spam.com"]));
    assert!(!harness.script.called("add_trusted_source"));
    Ok(())
}

#[tokio::test]
async fn test_trusted_source_cannot_be_excluded() -> Result<()> {
    let harness = Harness::new().await?;
    harness.sources.add_trusted("good.com").await?;

    let result = harness.sources.add_excluded("Good.com ").await;

    assert!(matches!(result, Err(CoreError::SourceConflict { .. })));
    assert!(harness.storage.fetch_excluded().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_add_and_remove_trusted() -> Result<()> {
    let harness = Harness::new().await?;

    assert_eq!(harness.sources.add_trusted("good.com").await?, "good.com");
    assert_eq!(harness.sources.add_trusted("good.com").await?, "good.com");
    assert_eq!(harness.storage.fetch_trusted().await?, set(&["good.com"]));

    assert_eq!(harness.sources.remove_trusted("good.com").await?, "good.com");
    assert!(harness.storage.fetch_trusted().await?.is_empty());
    assert!(harness.sources.trusted_sources().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_removing_non_member_is_noop() -> Result<()> {
    let harness = Harness::new().await?;

    assert_eq!(harness.sources.remove_excluded("unknown.com").await?, "unknown.com");

    assert!(!harness.script.called("remove_excluded_source"));
    assert!(harness.checkpoint().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_blank_source_is_rejected() -> Result<()> {
    let harness = Harness::new().await?;

    assert!(matches!(harness.sources.add_trusted("  ").await, Err(CoreError::InvalidArgument(_))));
    Ok(())
}

#[tokio::test]
async fn test_available_sources_prefers_substring_matches() -> Result<()> {
    let harness = Harness::new().await?;

    let sources = harness.sources.search_available_sources("times")?;
    assert!(sources.iter().any(|source| source.domain == "nytimes.com"));
    assert!(sources.iter().any(|source| source.domain == "ft.com"));

    let sources = harness.sources.search_available_sources("BBC")?;
    assert_eq!(sources[0].domain, "bbc.com");

    assert!(matches!(
        harness.sources.search_available_sources("zzzz"),
        Err(CoreError::NoResultsAvailable)
    ));
    Ok(())
}
