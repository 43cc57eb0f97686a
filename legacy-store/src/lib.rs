pub mod database;

pub use database::{LegacyDatabase, LegacyDataError, SourceKind};
