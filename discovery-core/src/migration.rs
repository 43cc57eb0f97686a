use std::collections::BTreeSet;

use legacy_store::LegacyDatabase;
use tracing::{error, info};

use crate::types::{
    ActiveData, CoreError, EngineFactory, EngineInitConfig, MigrationData, RankingEngine, Result, Storage,
};

/// Copies the migrated session into the core store. Upserts by id, so running
/// twice after a failed legacy cleanup changes nothing.
async fn import(storage: &dyn Storage, data: &MigrationData) -> Result<()> {
    let documents = data.documents.iter().map(|migrated| migrated.document.clone()).collect::<Vec<_>>();
    storage.upsert_documents(&documents).await?;
    for migrated in &data.documents {
        if let (true, Some(embedding)) = (migrated.document.is_active, &migrated.embedding) {
            let active_data = ActiveData {
                embedding: embedding.clone(),
                view_time: migrated.view_time.clone(),
            };
            storage.upsert_active_data(migrated.document.id, &active_data).await?;
        }
    }

    let mut trusted = storage.fetch_trusted().await?;
    let mut excluded = storage.fetch_excluded().await?;
    trusted.extend(data.trusted_sources.iter().cloned());
    excluded.extend(data.excluded_sources.iter().cloned());
    trusted.retain(|source| !excluded.contains(source));
    storage.set_sources(&trusted, &excluded).await?;

    let known = storage
        .fetch_reacted_sources()
        .await?
        .into_iter()
        .map(|reacted| reacted.source)
        .collect::<BTreeSet<_>>();
    for reacted in data.reacted_sources.iter().filter(|reacted| !known.contains(&reacted.source)) {
        storage.upsert_reacted_source(reacted).await?;
    }

    if let Some(search) = &data.search {
        if storage.fetch_search().await?.is_none() {
            storage.store_new_search(search, &[]).await?;
        }
    }
    Ok(())
}

/// Creates the ranking engine, handing it the legacy state exactly once.
///
/// The legacy store is cleared only after the new engine has been checkpointed.
/// If the engine can't be initialized nothing is written anywhere.
pub async fn initialize_engine(
    factory: &dyn EngineFactory,
    config: &EngineInitConfig,
    legacy: Option<&LegacyDatabase>,
    storage: &dyn Storage,
) -> Result<Box<dyn RankingEngine>> {
    let payload = match legacy {
        Some(legacy) => legacy
            .read_snapshot()
            .await
            .map_err(|err| CoreError::Migration(format!("reading legacy store: {}", err)))?,
        None => None,
    };
    let checkpoint = storage.fetch_checkpoint().await?;

    let Some(data) = payload else {
        return Ok(factory.initialize(config, None, checkpoint).await?);
    };

    info!(
        "Migrating {} legacy documents, {} trusted and {} excluded sources",
        data.documents.len(),
        data.trusted_sources.len(),
        data.excluded_sources.len()
    );
    let engine = factory
        .initialize(config, Some(data.clone()), checkpoint)
        .await
        .map_err(|err| {
            error!("Engine rejected the legacy state: {}", err);
            CoreError::Migration(err.to_string())
        })?;

    import(storage, &data).await?;
    let state = engine.serialize_state().await?;
    storage.store_checkpoint(&state).await?;

    if let Some(legacy) = legacy {
        legacy
            .clear_all()
            .await
            .map_err(|err| CoreError::Migration(format!("clearing legacy store: {}", err)))?;
    }
    info!("Legacy migration finished");
    Ok(engine)
}
