use std::path::Path;

use discovery_core::{CoreConfig, Market};
use figment::Jail;

#[test]
fn test_defaults() {
    let config = CoreConfig::default();

    assert_eq!(config.markets, vec![Market::new("en", "US")]);
    assert_eq!(config.max_feed_batch_size, 2);
    assert!(config.legacy_database_url.is_none());
}

#[test]
fn test_file_then_environment() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "discovery.toml",
            r#"
                max_feed_batch_size = 7
                search_page_size = 3
                excluded_sources = ["spam.com"]
            "#,
        )?;
        jail.set_env("DISCOVERY_SEARCH_PAGE_SIZE", "9");
        jail.set_env("LEGACY_DATABASE_URL", "sqlite://legacy.db");

        let config = CoreConfig::load(Some(Path::new("discovery.toml")))?;

        assert_eq!(config.max_feed_batch_size, 7);
        assert_eq!(config.search_page_size, 9);
        assert_eq!(config.legacy_database_url.as_deref(), Some("sqlite://legacy.db"));
        assert!(config.engine_init_config().excluded_sources.contains("spam.com"));
        Ok(())
    });
}

#[test]
fn test_json_file() {
    Jail::expect_with(|jail| {
        jail.create_file("discovery.json", r#"{ "markets": [{ "lang_code": "de", "country_code": "DE" }] }"#)?;

        let config = CoreConfig::load(Some(Path::new("discovery.json")))?;

        assert_eq!(config.markets, vec![Market::new("de", "DE")]);
        assert_eq!(config.database_url, "sqlite://discovery.db");
        Ok(())
    });
}
