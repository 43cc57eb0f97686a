pub mod baseline;
pub mod defs;
pub mod empty;
pub mod state;

pub use defs::{EngineError, EngineFactory, EngineResult, RankingEngine};
pub use state::{Storage, StoreError, StoreResult};
