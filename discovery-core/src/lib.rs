pub mod types;
pub mod config;
pub mod storage;
pub mod state;
pub mod catalog;
pub mod document_manager;
pub mod feed_manager;
pub mod search_manager;
pub mod source_manager;
pub mod migration;
pub mod router;

pub use types::*;
pub use config::CoreConfig;
pub use storage::SqliteStore;
pub use state::EngineState;
pub use document_manager::DocumentManager;
pub use feed_manager::FeedManager;
pub use search_manager::SearchManager;
pub use source_manager::SourceManager;
pub use router::DiscoveryEngine;
