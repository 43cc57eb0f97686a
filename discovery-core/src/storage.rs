use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use interfaces::state::{
    CheckpointStore, DocumentStore, SearchStore, SourcePreferenceStore, StoreResult,
};

use crate::types::{
    ActiveData, ActiveSearch, Document, DocumentFilter, DocumentId, DocumentTransition, Embedding,
    NewsResource, ReactedSource, SearchBy, StackId, StoreError, UserReaction, ViewMode,
};

trait OrBackend<T> {
    fn or_backend(self) -> StoreResult<T>;
}

impl<T, E: Display> OrBackend<T> for std::result::Result<T, E> {
    fn or_backend(self) -> StoreResult<T> {
        self.map_err(StoreError::backend)
    }
}

const DOCUMENT_COLUMNS: &str =
    "id, stack_id, resource, user_reaction, is_active, is_searched, batch_index, timestamp";

fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

fn from_micros(micros: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::corrupted(format!("timestamp {}", micros)))
}

fn document_from_row(row: &SqliteRow) -> StoreResult<Document> {
    let id: String = row.get("id");
    let stack_id: String = row.get("stack_id");
    let resource: String = row.get("resource");
    let reaction: String = row.get("user_reaction");
    Ok(Document {
        id: DocumentId::from_str(&id).map_err(StoreError::corrupted)?,
        stack_id: StackId::from_str(&stack_id).map_err(StoreError::corrupted)?,
        resource: serde_json::from_str::<NewsResource>(&resource).map_err(StoreError::corrupted)?,
        user_reaction: UserReaction::from_str(&reaction).map_err(StoreError::corrupted)?,
        is_active: row.get::<bool, _>("is_active"),
        is_searched: row.get::<bool, _>("is_searched"),
        batch_index: row.get::<i64, _>("batch_index") as u32,
        timestamp: from_micros(row.get("timestamp"))?,
    })
}

async fn upsert_document(conn: &mut SqliteConnection, document: &Document) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO documents
            (id, stack_id, resource, user_reaction, is_active, is_searched, batch_index, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT (id) DO UPDATE SET
            user_reaction = excluded.user_reaction,
            is_active = excluded.is_active,
            is_searched = excluded.is_searched,
            batch_index = excluded.batch_index,
            timestamp = excluded.timestamp
        "#,
    )
    .bind(document.id.to_string())
    .bind(document.stack_id.to_string())
    .bind(serde_json::to_string(&document.resource).or_backend()?)
    .bind(document.user_reaction.as_str())
    .bind(document.is_active)
    .bind(document.is_searched)
    .bind(i64::from(document.batch_index))
    .bind(to_micros(document.timestamp))
    .execute(&mut *conn)
    .await
    .or_backend()?;
    Ok(())
}

async fn upsert_active_data(conn: &mut SqliteConnection, id: DocumentId, data: &ActiveData) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO active_data (document_id, embedding, view_time)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (document_id) DO UPDATE SET
            embedding = excluded.embedding,
            view_time = excluded.view_time
        "#,
    )
    .bind(id.to_string())
    .bind(serde_json::to_string(&data.embedding).or_backend()?)
    .bind(serde_json::to_string(&data.view_time).or_backend()?)
    .execute(&mut *conn)
    .await
    .or_backend()?;
    Ok(())
}

async fn insert_batch(conn: &mut SqliteConnection, batch: &[(Document, ActiveData)]) -> StoreResult<()> {
    for (document, data) in batch {
        upsert_document(conn, document).await?;
        upsert_active_data(conn, document.id, data).await?;
    }
    Ok(())
}

async fn drop_session_state(conn: &mut SqliteConnection, id: DocumentId) -> StoreResult<()> {
    for statement in [
        "DELETE FROM active_data WHERE document_id = ?1",
        "DELETE FROM changed_documents WHERE document_id = ?1",
    ] {
        sqlx::query(statement)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .or_backend()?;
    }
    Ok(())
}

async fn deactivate(conn: &mut SqliteConnection, ids: &[DocumentId]) -> StoreResult<()> {
    for id in ids {
        sqlx::query("UPDATE documents SET is_active = 0 WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .or_backend()?;
        drop_session_state(conn, *id).await?;
    }
    Ok(())
}

async fn delete(conn: &mut SqliteConnection, ids: &[DocumentId]) -> StoreResult<()> {
    for id in ids {
        drop_session_state(conn, *id).await?;
        sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .or_backend()?;
    }
    Ok(())
}

async fn replace_sources(conn: &mut SqliteConnection, kind: &str, sources: &BTreeSet<String>) -> StoreResult<()> {
    sqlx::query("DELETE FROM source_preferences WHERE kind = ?1")
        .bind(kind)
        .execute(&mut *conn)
        .await
        .or_backend()?;
    for source in sources {
        sqlx::query("INSERT OR REPLACE INTO source_preferences (source, kind) VALUES (?1, ?2)")
            .bind(source)
            .bind(kind)
            .execute(&mut *conn)
            .await
            .or_backend()?;
    }
    Ok(())
}

/// SQLite backed implementation of every store the core uses.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .or_backend()?
            .create_if_missing(true);
        let max_connections = if database_url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .or_backend()?;
        let store = Self { pool };
        store.setup_schema().await?;
        info!("Opened document store at {}", database_url);
        Ok(store)
    }

    /// A private store which lives as long as the value.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::new("sqlite::memory:").await
    }

    pub async fn setup_schema(&self) -> StoreResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                stack_id TEXT NOT NULL,
                resource TEXT NOT NULL,
                user_reaction TEXT NOT NULL DEFAULT 'neutral',
                is_active INTEGER NOT NULL,
                is_searched INTEGER NOT NULL,
                batch_index INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS active_data (
                document_id TEXT PRIMARY KEY REFERENCES documents(id),
                embedding TEXT NOT NULL,
                view_time TEXT NOT NULL
            )
            "#,
            "CREATE TABLE IF NOT EXISTS changed_documents (document_id TEXT PRIMARY KEY)",
            r#"
            CREATE TABLE IF NOT EXISTS search (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                search_term TEXT NOT NULL,
                search_by TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                page_size INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS source_preferences (
                source TEXT PRIMARY KEY,
                kind TEXT NOT NULL CHECK (kind IN ('trusted', 'excluded'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS reacted_sources (
                source TEXT PRIMARY KEY,
                liked INTEGER NOT NULL,
                last_reacted INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                state BLOB NOT NULL
            )
            "#,
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await.or_backend()?;
        }
        Ok(())
    }

    async fn fetch_sources(&self, kind: &str) -> StoreResult<BTreeSet<String>> {
        let rows = sqlx::query("SELECT source FROM source_preferences WHERE kind = ?1")
            .bind(kind)
            .fetch_all(&self.pool)
            .await
            .or_backend()?;
        Ok(rows.into_iter().map(|row| row.get("source")).collect())
    }

    async fn replace_single_list(&self, kind: &str, sources: &BTreeSet<String>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.or_backend()?;
        replace_sources(&mut tx, kind, sources).await?;
        tx.commit().await.or_backend()
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn fetch_document(&self, id: DocumentId) -> StoreResult<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .or_backend()?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn fetch_documents(&self, filter: DocumentFilter) -> StoreResult<Vec<Document>> {
        let mut sql = format!("SELECT {} FROM documents WHERE 1 = 1", DOCUMENT_COLUMNS);
        if filter.active.is_some() {
            sql.push_str(" AND is_active = ?");
        }
        if filter.searched.is_some() {
            sql.push_str(" AND is_searched = ?");
        }
        let mut query = sqlx::query(&sql);
        if let Some(active) = filter.active {
            query = query.bind(active);
        }
        if let Some(searched) = filter.searched {
            query = query.bind(searched);
        }
        let rows = query.fetch_all(&self.pool).await.or_backend()?;
        rows.iter().map(document_from_row).collect()
    }

    async fn upsert_documents(&self, documents: &[Document]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.or_backend()?;
        for document in documents {
            upsert_document(&mut tx, document).await?;
        }
        tx.commit().await.or_backend()
    }

    async fn store_batch(&self, batch: &[(Document, ActiveData)]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.or_backend()?;
        insert_batch(&mut tx, batch).await?;
        tx.commit().await.or_backend()?;
        debug!("Stored batch of {} documents", batch.len());
        Ok(())
    }

    async fn transition_document(&self, id: DocumentId, transition: DocumentTransition) -> StoreResult<Option<Document>> {
        let mut tx = self.pool.begin().await.or_backend()?;
        let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .or_backend()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let document = document_from_row(&row)?.apply(transition);

        sqlx::query("UPDATE documents SET user_reaction = ?1, is_active = ?2 WHERE id = ?3")
            .bind(document.user_reaction.as_str())
            .bind(document.is_active)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .or_backend()?;
        match transition {
            DocumentTransition::React(_) => {
                sqlx::query("INSERT OR IGNORE INTO changed_documents (document_id) VALUES (?1)")
                    .bind(id.to_string())
                    .execute(&mut *tx)
                    .await
                    .or_backend()?;
            }
            DocumentTransition::Deactivate => drop_session_state(&mut tx, id).await?,
        }
        tx.commit().await.or_backend()?;
        Ok(Some(document))
    }

    async fn deactivate_documents(&self, ids: &[DocumentId]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.or_backend()?;
        deactivate(&mut tx, ids).await?;
        tx.commit().await.or_backend()
    }

    async fn fetch_active_data(&self, id: DocumentId) -> StoreResult<Option<ActiveData>> {
        let row = sqlx::query("SELECT embedding, view_time FROM active_data WHERE document_id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .or_backend()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let embedding: String = row.get("embedding");
        let view_time: String = row.get("view_time");
        Ok(Some(ActiveData {
            embedding: serde_json::from_str::<Embedding>(&embedding).map_err(StoreError::corrupted)?,
            view_time: serde_json::from_str::<BTreeMap<ViewMode, Duration>>(&view_time)
                .map_err(StoreError::corrupted)?,
        }))
    }

    async fn upsert_active_data(&self, id: DocumentId, data: &ActiveData) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.or_backend()?;
        upsert_active_data(&mut conn, id, data).await
    }

    async fn fetch_changed(&self) -> StoreResult<Vec<DocumentId>> {
        let rows = sqlx::query("SELECT document_id FROM changed_documents")
            .fetch_all(&self.pool)
            .await
            .or_backend()?;
        rows.iter()
            .map(|row| DocumentId::from_str(row.get("document_id")).map_err(StoreError::corrupted))
            .collect()
    }
}

#[async_trait]
impl SearchStore for SqliteStore {
    async fn fetch_search(&self) -> StoreResult<Option<ActiveSearch>> {
        let row = sqlx::query("SELECT search_term, search_by, page_number, page_size FROM search WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .or_backend()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let search_by: String = row.get("search_by");
        Ok(Some(ActiveSearch {
            search_term: row.get("search_term"),
            search_by: SearchBy::from_str(&search_by).map_err(StoreError::corrupted)?,
            page_number: row.get::<i64, _>("page_number") as u32,
            page_size: row.get::<i64, _>("page_size") as u32,
        }))
    }

    async fn store_new_search(&self, search: &ActiveSearch, batch: &[(Document, ActiveData)]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.or_backend()?;
        let existing = sqlx::query("SELECT COUNT(*) as count FROM search")
            .fetch_one(&mut *tx)
            .await
            .or_backend()?;
        if existing.get::<i64, _>("count") > 0 {
            return Err(StoreError::Conflict("a search is already stored".to_string()));
        }
        sqlx::query(
            r#"
            INSERT INTO search (id, search_term, search_by, page_number, page_size)
            VALUES (0, ?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&search.search_term)
        .bind(search.search_by.to_string())
        .bind(i64::from(search.page_number))
        .bind(i64::from(search.page_size))
        .execute(&mut *tx)
        .await
        .or_backend()?;
        insert_batch(&mut tx, batch).await?;
        tx.commit().await.or_backend()
    }

    async fn store_next_page(&self, page_number: u32, batch: &[(Document, ActiveData)]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.or_backend()?;
        let updated = sqlx::query("UPDATE search SET page_number = ?1 WHERE id = 0")
            .bind(i64::from(page_number))
            .execute(&mut *tx)
            .await
            .or_backend()?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict("no search is stored".to_string()));
        }
        insert_batch(&mut tx, batch).await?;
        tx.commit().await.or_backend()
    }

    async fn close_search(&self, keep: &[DocumentId], delete_ids: &[DocumentId]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.or_backend()?;
        deactivate(&mut tx, keep).await?;
        delete(&mut tx, delete_ids).await?;
        sqlx::query("DELETE FROM search")
            .execute(&mut *tx)
            .await
            .or_backend()?;
        tx.commit().await.or_backend()
    }
}

#[async_trait]
impl SourcePreferenceStore for SqliteStore {
    async fn fetch_trusted(&self) -> StoreResult<BTreeSet<String>> {
        self.fetch_sources("trusted").await
    }

    async fn fetch_excluded(&self) -> StoreResult<BTreeSet<String>> {
        self.fetch_sources("excluded").await
    }

    async fn set_sources(&self, trusted: &BTreeSet<String>, excluded: &BTreeSet<String>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.or_backend()?;
        replace_sources(&mut tx, "trusted", trusted).await?;
        replace_sources(&mut tx, "excluded", excluded).await?;
        tx.commit().await.or_backend()
    }

    async fn set_trusted(&self, sources: &BTreeSet<String>) -> StoreResult<()> {
        self.replace_single_list("trusted", sources).await
    }

    async fn set_excluded(&self, sources: &BTreeSet<String>) -> StoreResult<()> {
        self.replace_single_list("excluded", sources).await
    }

    async fn fetch_reacted_sources(&self) -> StoreResult<Vec<ReactedSource>> {
        let rows = sqlx::query("SELECT source, liked, last_reacted FROM reacted_sources ORDER BY last_reacted DESC")
            .fetch_all(&self.pool)
            .await
            .or_backend()?;
        rows.iter()
            .map(|row| -> StoreResult<ReactedSource> {
                Ok(ReactedSource {
                    source: row.get("source"),
                    liked: row.get::<bool, _>("liked"),
                    last_reacted: from_micros(row.get("last_reacted"))?,
                })
            })
            .collect()
    }

    async fn fetch_reacted_source(&self, source: &str) -> StoreResult<Option<ReactedSource>> {
        let row = sqlx::query("SELECT source, liked, last_reacted FROM reacted_sources WHERE source = ?1")
            .bind(source)
            .fetch_optional(&self.pool)
            .await
            .or_backend()?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ReactedSource {
            source: row.get("source"),
            liked: row.get::<bool, _>("liked"),
            last_reacted: from_micros(row.get("last_reacted"))?,
        }))
    }

    async fn upsert_reacted_source(&self, source: &ReactedSource) -> StoreResult<()> {
        sqlx::query("INSERT OR REPLACE INTO reacted_sources (source, liked, last_reacted) VALUES (?1, ?2, ?3)")
            .bind(&source.source)
            .bind(source.liked)
            .bind(to_micros(source.last_reacted))
            .execute(&self.pool)
            .await
            .or_backend()?;
        Ok(())
    }

    async fn delete_reacted_source(&self, source: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM reacted_sources WHERE source = ?1")
            .bind(source)
            .execute(&self.pool)
            .await
            .or_backend()?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn store_checkpoint(&self, state: &[u8]) -> StoreResult<()> {
        sqlx::query("INSERT OR REPLACE INTO checkpoint (id, state) VALUES (0, ?1)")
            .bind(state)
            .execute(&self.pool)
            .await
            .or_backend()?;
        Ok(())
    }

    async fn fetch_checkpoint(&self) -> StoreResult<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT state FROM checkpoint WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .or_backend()?;
        Ok(row.map(|row| row.get::<Vec<u8>, _>("state")))
    }
}
