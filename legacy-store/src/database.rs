use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use interfaces::defs::ActiveSearch;
use interfaces::defs::Document;
use interfaces::defs::DocumentId;
use interfaces::defs::Embedding;
use interfaces::defs::MigrationData;
use interfaces::defs::MigrationDocument;
use interfaces::defs::NewsResource;
use interfaces::defs::ReactedSource;
use interfaces::defs::SearchBy;
use interfaces::defs::StackId;
use interfaces::defs::UserReaction;
use interfaces::defs::ViewMode;

/// Rows which can't be turned back into domain values.
#[derive(Debug, thiserror::Error)]
pub enum LegacyDataError {
    #[error("Invalid identifier in legacy row: {0}")]
    InvalidId(String),

    #[error("Invalid timestamp in legacy row: {0}")]
    InvalidTimestamp(i64),

    #[error("Invalid value in legacy row: {0}")]
    InvalidValue(String),
}

/// Which preference list a legacy source row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Trusted,
    Excluded,
}

impl SourceKind {
    fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Trusted => "trusted",
            SourceKind::Excluded => "excluded",
        }
    }
}

const TABLES: [&str; 7] = [
    "legacy_view_times",
    "legacy_active_data",
    "legacy_documents",
    "legacy_reacted_sources",
    "legacy_source_preferences",
    "legacy_search",
    "legacy_engine_state",
];

fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, LegacyDataError> {
    DateTime::from_timestamp_micros(micros).ok_or(LegacyDataError::InvalidTimestamp(micros))
}

fn parse<T: FromStr>(value: &str) -> Result<T, LegacyDataError> {
    value
        .parse::<T>()
        .map_err(|_| LegacyDataError::InvalidValue(value.to_owned()))
}

fn document_from_row(row: &SqliteRow) -> Result<(Document, Option<Embedding>)> {
    let id: String = row.get("id");
    let stack_id: String = row.get("stack_id");
    let resource: String = row.get("resource");
    let reaction: String = row.get("user_reaction");
    let embedding: Option<String> = row.get("embedding");

    let document = Document {
        id: DocumentId::from_str(&id).map_err(|_| LegacyDataError::InvalidId(id.clone()))?,
        stack_id: StackId::from_str(&stack_id).map_err(|_| LegacyDataError::InvalidId(stack_id.clone()))?,
        resource: serde_json::from_str::<NewsResource>(&resource)
            .with_context(|| format!("Failed to decode legacy resource of {}", id))?,
        user_reaction: parse::<UserReaction>(&reaction)?,
        is_active: row.get::<bool, _>("is_active"),
        is_searched: row.get::<bool, _>("is_searched"),
        batch_index: row.get::<i64, _>("batch_index") as u32,
        timestamp: from_micros(row.get("timestamp"))?,
    };
    let embedding = embedding
        .map(|json| serde_json::from_str::<Embedding>(&json))
        .transpose()
        .with_context(|| format!("Failed to decode legacy embedding of {}", id))?;
    Ok((document, embedding))
}

/// The persisted store of the previous client generation.
///
/// It is read exactly once by the migration and cleared afterwards.
pub struct LegacyDatabase {
    pool: SqlitePool,
}

impl LegacyDatabase {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // every in-memory connection is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Opens the store and makes sure the schema exists.
    pub async fn open(database_url: &str) -> Result<Self> {
        let db = Self::new(database_url).await?;
        db.setup_schema().await?;
        Ok(db)
    }

    pub async fn setup_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS legacy_documents (
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
            CREATE TABLE IF NOT EXISTS legacy_active_data (
                document_id TEXT PRIMARY KEY REFERENCES legacy_documents(id),
                embedding TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS legacy_view_times (
                document_id TEXT NOT NULL,
                view_mode TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                PRIMARY KEY (document_id, view_mode)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS legacy_reacted_sources (
                source TEXT PRIMARY KEY,
                liked INTEGER NOT NULL,
                last_reacted INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS legacy_source_preferences (
                source TEXT PRIMARY KEY,
                kind TEXT NOT NULL CHECK (kind IN ('trusted', 'excluded'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS legacy_search (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                search_term TEXT NOT NULL,
                search_by TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                page_size INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS legacy_engine_state (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                state BLOB NOT NULL
            )
            "#,
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// True when no table holds any row.
    pub async fn is_empty(&self) -> Result<bool> {
        for table in TABLES {
            let row = sqlx::query(&format!("SELECT COUNT(*) as count FROM {}", table))
                .fetch_one(&self.pool)
                .await?;
            if row.get::<i64, _>("count") > 0 {
                debug!("Legacy table {} is not empty", table);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Reads every entity class into one snapshot, `None` if there is nothing to migrate.
    pub async fn read_snapshot(&self) -> Result<Option<MigrationData>> {
        if self.is_empty().await? {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT d.id, d.stack_id, d.resource, d.user_reaction, d.is_active, d.is_searched,
                   d.batch_index, d.timestamp, a.embedding
            FROM legacy_documents d
            LEFT JOIN legacy_active_data a ON a.document_id = d.id
            ORDER BY d.timestamp, d.batch_index
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut view_times: BTreeMap<DocumentId, BTreeMap<ViewMode, Duration>> = BTreeMap::new();
        for row in sqlx::query("SELECT document_id, view_mode, duration_ms FROM legacy_view_times")
            .fetch_all(&mut *tx)
            .await?
        {
            let id: String = row.get("document_id");
            let mode: String = row.get("view_mode");
            let millis: i64 = row.get("duration_ms");
            let id = DocumentId::from_str(&id).map_err(|_| LegacyDataError::InvalidId(id.clone()))?;
            view_times
                .entry(id)
                .or_default()
                .insert(parse::<ViewMode>(&mode)?, Duration::from_millis(millis.max(0) as u64));
        }

        let mut documents = Vec::with_capacity(rows.len());
        for row in &rows {
            let (document, embedding) = document_from_row(row)?;
            let view_time = view_times.remove(&document.id).unwrap_or_default();
            documents.push(MigrationDocument { document, embedding, view_time });
        }

        let mut data = MigrationData {
            documents,
            ..MigrationData::default()
        };

        for row in sqlx::query("SELECT source, liked, last_reacted FROM legacy_reacted_sources ORDER BY last_reacted DESC")
            .fetch_all(&mut *tx)
            .await?
        {
            data.reacted_sources.push(ReactedSource {
                source: row.get("source"),
                liked: row.get::<bool, _>("liked"),
                last_reacted: from_micros(row.get("last_reacted"))?,
            });
        }

        for row in sqlx::query("SELECT source, kind FROM legacy_source_preferences")
            .fetch_all(&mut *tx)
            .await?
        {
            let source: String = row.get("source");
            match row.get::<String, _>("kind").as_str() {
                "trusted" => data.trusted_sources.insert(source),
                "excluded" => data.excluded_sources.insert(source),
                other => return Err(LegacyDataError::InvalidValue(other.to_owned()).into()),
            };
        }

        if let Some(row) = sqlx::query("SELECT search_term, search_by, page_number, page_size FROM legacy_search WHERE id = 0")
            .fetch_optional(&mut *tx)
            .await?
        {
            let search_by: String = row.get("search_by");
            data.search = Some(ActiveSearch {
                search_term: row.get("search_term"),
                search_by: parse::<SearchBy>(&search_by)?,
                page_number: row.get::<i64, _>("page_number") as u32,
                page_size: row.get::<i64, _>("page_size") as u32,
            });
        }

        data.engine_state = sqlx::query("SELECT state FROM legacy_engine_state WHERE id = 0")
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get::<Vec<u8>, _>("state"));

        tx.commit().await?;

        info!(
            "Read legacy snapshot with {} documents and {} reacted sources",
            data.documents.len(),
            data.reacted_sources.len()
        );
        Ok(Some(data))
    }

    /// Deletes every legacy row in one transaction.
    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in TABLES {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!("Cleared legacy store");
        Ok(())
    }

    /// Store a document together with its embedding, if it was active.
    pub async fn insert_document(&self, document: &Document, embedding: Option<&Embedding>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO legacy_documents
                (id, stack_id, resource, user_reaction, is_active, is_searched, batch_index, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(document.id.to_string())
        .bind(document.stack_id.to_string())
        .bind(serde_json::to_string(&document.resource)?)
        .bind(document.user_reaction.as_str())
        .bind(document.is_active)
        .bind(document.is_searched)
        .bind(i64::from(document.batch_index))
        .bind(to_micros(document.timestamp))
        .execute(&mut *tx)
        .await?;

        if let Some(embedding) = embedding {
            sqlx::query("INSERT OR REPLACE INTO legacy_active_data (document_id, embedding) VALUES (?1, ?2)")
                .bind(document.id.to_string())
                .bind(serde_json::to_string(embedding)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_view_time(&self, id: DocumentId, mode: ViewMode, duration: Duration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO legacy_view_times (document_id, view_mode, duration_ms)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (document_id, view_mode)
            DO UPDATE SET duration_ms = duration_ms + excluded.duration_ms
            "#,
        )
        .bind(id.to_string())
        .bind(mode.as_str())
        .bind(duration.as_millis() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_reacted_source(&self, source: &ReactedSource) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO legacy_reacted_sources (source, liked, last_reacted) VALUES (?1, ?2, ?3)")
            .bind(&source.source)
            .bind(source.liked)
            .bind(to_micros(source.last_reacted))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_source_preference(&self, source: &str, kind: SourceKind) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO legacy_source_preferences (source, kind) VALUES (?1, ?2)")
            .bind(source)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_search(&self, search: &ActiveSearch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO legacy_search (id, search_term, search_by, page_number, page_size)
            VALUES (0, ?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&search.search_term)
        .bind(search.search_by.to_string())
        .bind(i64::from(search.page_number))
        .bind(i64::from(search.page_size))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_engine_state(&self, state: &[u8]) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO legacy_engine_state (id, state) VALUES (0, ?1)")
            .bind(state)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
