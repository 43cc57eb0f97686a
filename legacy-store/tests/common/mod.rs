// Shared fixtures for legacy store tests
pub use legacy_store::database::{LegacyDatabase, SourceKind};

use chrono::{DateTime, Duration, TimeZone, Utc};
use interfaces::defs::{Document, DocumentId, Market, NewsResource, StackId, UserReaction};
use url::Url;

pub const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Set up an in-memory legacy database with schema
pub async fn setup_test_database() -> anyhow::Result<LegacyDatabase> {
    let _ = tracing_subscriber::fmt::try_init();
    LegacyDatabase::open(IN_MEMORY_URL).await
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().unwrap()
}

pub fn sample_document(index: u32, reaction: UserReaction, is_active: bool) -> Document {
    Document {
        id: DocumentId::new(),
        stack_id: StackId::from_u128(7),
        resource: NewsResource {
            title: format!("Legacy title {}", index),
            snippet: format!("Legacy snippet {}", index),
            url: Url::parse(&format!("https://example.com/legacy/{}", index)).unwrap(),
            source_domain: "example.com".to_string(),
            date_published: base_time(),
            image: None,
            topic: "news".to_string(),
            market: Market::new("en", "US"),
        },
        user_reaction: reaction,
        is_active,
        is_searched: false,
        batch_index: index,
        timestamp: base_time() + Duration::minutes(i64::from(index)),
    }
}
