//! Configuration of the discovery engine.
//!
//! Values are merged from the built-in defaults, an optional JSON or TOML file,
//! the plain `DATABASE_URL` / `LEGACY_DATABASE_URL` variables and finally
//! `DISCOVERY_*` environment variables.

use std::collections::BTreeSet;
use std::path::Path;

use figment::providers::{Env, Format, Json, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::types::{EngineInitConfig, Market};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database_url: String,
    /// Store of the previous client generation, migrated once on startup.
    pub legacy_database_url: Option<String>,
    pub markets: Vec<Market>,
    pub max_feed_batch_size: u32,
    pub search_page_size: u32,
    pub trusted_sources: BTreeSet<String>,
    pub excluded_sources: BTreeSet<String>,
    /// Handed to the ranking engine as is.
    pub engine_config: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://discovery.db".to_string(),
            legacy_database_url: None,
            markets: vec![Market::new("en", "US")],
            max_feed_batch_size: 2,
            search_page_size: 20,
            trusted_sources: BTreeSet::new(),
            excluded_sources: BTreeSet::new(),
            engine_config: None,
        }
    }
}

impl CoreConfig {
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(CoreConfig::default()));
        if let Some(file) = file {
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("json") => figment.merge(Json::file(file)),
                _ => figment.merge(Toml::file(file)),
            };
        }
        figment
            .merge(Env::raw().only(&["database_url", "legacy_database_url"]))
            .merge(Env::prefixed("DISCOVERY_"))
    }

    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(file).extract()
    }

    pub fn engine_init_config(&self) -> EngineInitConfig {
        EngineInitConfig {
            markets: self.markets.clone(),
            trusted_sources: self.trusted_sources.clone(),
            excluded_sources: self.excluded_sources.clone(),
            engine_config: self.engine_config.clone(),
        }
    }
}
