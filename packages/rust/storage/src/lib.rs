//! Embedded libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding registered sources,
//! the fingerprint store, extracted documents, run manifests and per-target
//! error logs.
//!
//! **Access rules:**
//! - The persistence writer is the only mutator of `fingerprints` and
//!   `documents`; it gets its own connection via [`Storage::connect_again`].
//! - `lexcrawl status` reads via [`Storage::open_readonly`].

mod migrations;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use lexcrawl_shared::{
    Classification, DocId, Document, Fingerprint, FingerprintRecord, LexCrawlError, Result,
    RunCounts, RunId, RunManifest, SourceConfig,
};
use libsql::{Connection, Database, params};

/// A single unit of work for the persistence writer.
#[derive(Debug, Clone)]
pub enum WriteCommand {
    /// Insert or update a document together with its fingerprint record.
    Upsert {
        record: FingerprintRecord,
        document: Document,
        classification: Classification,
    },
    /// Refresh `last_seen_at` of an unchanged document.
    Touch {
        doc_id: DocId,
        seen_at: DateTime<Utc>,
    },
}

impl WriteCommand {
    pub fn doc_id(&self) -> &DocId {
        match self {
            Self::Upsert { record, .. } => &record.doc_id,
            Self::Touch { doc_id, .. } => doc_id,
        }
    }

    pub fn classification(&self) -> Classification {
        match self {
            Self::Upsert { classification, .. } => *classification,
            Self::Touch { .. } => Classification::Unchanged,
        }
    }
}

/// A logged per-target failure.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetError {
    pub run_id: String,
    pub url: String,
    pub kind: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Arc<Database>,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LexCrawlError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(LexCrawlError::persistence)?;

        let conn = db.connect().map_err(LexCrawlError::persistence)?;

        let storage = Self {
            db: Arc::new(db),
            conn,
            readonly: false,
        };
        storage.configure_connection().await?;
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LexCrawlError::persistence(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(LexCrawlError::persistence)?;

        let conn = db.connect().map_err(LexCrawlError::persistence)?;

        Ok(Self {
            db: Arc::new(db),
            conn,
            readonly: true,
        })
    }

    /// Open a second connection to the same database.
    ///
    /// The writer task commits through its own connection so that readers
    /// never observe its uncommitted batch.
    pub async fn connect_again(&self) -> Result<Self> {
        let conn = self.db.connect().map_err(LexCrawlError::persistence)?;
        let storage = Self {
            db: Arc::clone(&self.db),
            conn,
            readonly: self.readonly,
        };
        storage.configure_connection().await?;
        Ok(storage)
    }

    async fn configure_connection(&self) -> Result<()> {
        // Both pragmas return a row, so they go through `query`.
        for pragma in ["PRAGMA journal_mode = WAL", "PRAGMA busy_timeout = 5000"] {
            let mut rows = self
                .conn
                .query(pragma, params![])
                .await
                .map_err(LexCrawlError::persistence)?;
            while rows
                .next()
                .await
                .map_err(LexCrawlError::persistence)?
                .is_some()
            {}
        }
        Ok(())
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    LexCrawlError::persistence(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(LexCrawlError::persistence(
                "database is opened in read-only mode",
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Source operations
    // -----------------------------------------------------------------------

    /// Register a source, replacing any previous definition with the same id.
    pub async fn upsert_source(&self, source: &SourceConfig) -> Result<()> {
        self.check_writable()?;
        let config_json = serde_json::to_string(source).map_err(LexCrawlError::persistence)?;
        self.conn
            .execute(
                "INSERT INTO sources (id, name, strategy, language, active, config_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   strategy = excluded.strategy,
                   language = excluded.language,
                   active = excluded.active,
                   config_json = excluded.config_json,
                   updated_at = excluded.updated_at",
                params![
                    source.id.as_str(),
                    source.name.as_str(),
                    source.strategy.kind(),
                    source.language.as_deref(),
                    i64::from(source.active),
                    config_json,
                    ts(&Utc::now()),
                ],
            )
            .await
            .map_err(LexCrawlError::persistence)?;
        Ok(())
    }

    /// All registered sources with the active flag set, ordered by id.
    pub async fn list_active_sources(&self) -> Result<Vec<SourceConfig>> {
        self.query_sources("SELECT config_json, active FROM sources WHERE active = 1 ORDER BY id")
            .await
    }

    /// All registered sources, ordered by id.
    pub async fn list_sources(&self) -> Result<Vec<SourceConfig>> {
        self.query_sources("SELECT config_json, active FROM sources ORDER BY id")
            .await
    }

    async fn query_sources(&self, sql: &str) -> Result<Vec<SourceConfig>> {
        let mut rows = self
            .conn
            .query(sql, params![])
            .await
            .map_err(LexCrawlError::persistence)?;

        let mut sources = Vec::new();
        while let Some(row) = rows.next().await.map_err(LexCrawlError::persistence)? {
            let json: String = row.get(0).map_err(LexCrawlError::persistence)?;
            let active: i64 = row.get(1).map_err(LexCrawlError::persistence)?;
            let mut source: SourceConfig = serde_json::from_str(&json)
                .map_err(|e| LexCrawlError::persistence(format!("invalid source row: {e}")))?;
            source.active = active != 0;
            sources.push(source);
        }
        Ok(sources)
    }

    // -----------------------------------------------------------------------
    // Fingerprint store
    // -----------------------------------------------------------------------

    /// Look up the fingerprint record for a document.
    pub async fn get_fingerprint(&self, doc_id: &DocId) -> Result<Option<FingerprintRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc_id, source_id, url, fingerprint, first_seen_at, last_seen_at,
                        last_changed_at, version
                 FROM fingerprints WHERE doc_id = ?1",
                params![doc_id.as_str()],
            )
            .await
            .map_err(LexCrawlError::persistence)?;

        match rows.next().await.map_err(LexCrawlError::persistence)? {
            Some(row) => Ok(Some(row_to_fingerprint(&row)?)),
            None => Ok(None),
        }
    }

    /// Records whose `last_seen_at` is strictly older than `seen_before`.
    pub async fn list_stale_fingerprints(
        &self,
        seen_before: DateTime<Utc>,
    ) -> Result<Vec<FingerprintRecord>> {
        self.query_fingerprints(
            "SELECT doc_id, source_id, url, fingerprint, first_seen_at, last_seen_at,
                    last_changed_at, version
             FROM fingerprints WHERE last_seen_at < ?1 ORDER BY doc_id",
            Some(ts(&seen_before)),
        )
        .await
    }

    /// Every fingerprint record, ordered by doc id.
    pub async fn list_fingerprints(&self) -> Result<Vec<FingerprintRecord>> {
        self.query_fingerprints(
            "SELECT doc_id, source_id, url, fingerprint, first_seen_at, last_seen_at,
                    last_changed_at, version
             FROM fingerprints ORDER BY doc_id",
            None,
        )
        .await
    }

    async fn query_fingerprints(
        &self,
        sql: &str,
        arg: Option<String>,
    ) -> Result<Vec<FingerprintRecord>> {
        let mut rows = match arg {
            Some(arg) => self.conn.query(sql, params![arg]).await,
            None => self.conn.query(sql, params![]).await,
        }
        .map_err(LexCrawlError::persistence)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(LexCrawlError::persistence)? {
            records.push(row_to_fingerprint(&row)?);
        }
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Writes (fingerprints + documents)
    // -----------------------------------------------------------------------

    /// Apply a batch of commands in one transaction. On error the whole
    /// batch is rolled back.
    pub async fn apply_batch(&self, commands: &[WriteCommand]) -> Result<()> {
        self.check_writable()?;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(LexCrawlError::persistence)?;

        for command in commands {
            if let Err(e) = apply_command(&tx, command).await {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                return Err(e);
            }
        }

        tx.commit().await.map_err(LexCrawlError::persistence)
    }

    /// Apply a single command in its own transaction.
    pub async fn apply_commit(&self, command: &WriteCommand) -> Result<()> {
        self.apply_batch(std::slice::from_ref(command)).await
    }

    /// Delete every fingerprint and document (used by recreate runs).
    /// Sources, manifests and error logs are kept.
    pub async fn clear_crawl_state(&self) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute_batch(
                "BEGIN;
                 DELETE FROM documents;
                 DELETE FROM fingerprints;
                 COMMIT;",
            )
            .await
            .map_err(LexCrawlError::persistence)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    pub async fn get_document(&self, doc_id: &DocId) -> Result<Option<Document>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE doc_id = ?1"),
                params![doc_id.as_str()],
            )
            .await
            .map_err(LexCrawlError::persistence)?;

        match rows.next().await.map_err(LexCrawlError::persistence)? {
            Some(row) => Ok(Some(row_to_document(&row)?)),
            None => Ok(None),
        }
    }

    /// Every stored document, ordered by doc id.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY doc_id"),
                params![],
            )
            .await
            .map_err(LexCrawlError::persistence)?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next().await.map_err(LexCrawlError::persistence)? {
            documents.push(row_to_document(&row)?);
        }
        Ok(documents)
    }

    pub async fn count_documents(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM documents", params![])
            .await
            .map_err(LexCrawlError::persistence)?;
        match rows.next().await.map_err(LexCrawlError::persistence)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(LexCrawlError::persistence)? as u64),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Run manifests
    // -----------------------------------------------------------------------

    /// Insert the manifest of a run that is just starting.
    pub async fn insert_run_manifest(&self, manifest: &RunManifest) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO run_manifests (id, mode, status, started_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    manifest.id.to_string(),
                    manifest.mode.as_str(),
                    manifest.status.as_str(),
                    ts(&manifest.started_at),
                ],
            )
            .await
            .map_err(LexCrawlError::persistence)?;
        Ok(())
    }

    /// Write the final status, end time, counts and error of a run.
    pub async fn finish_run_manifest(&self, manifest: &RunManifest) -> Result<()> {
        self.check_writable()?;
        let counts = &manifest.counts;
        let affected = self
            .conn
            .execute(
                "UPDATE run_manifests SET
                   status = ?2, finished_at = ?3, fetched = ?4, new_count = ?5,
                   changed = ?6, unchanged = ?7, failed = ?8, error = ?9
                 WHERE id = ?1",
                params![
                    manifest.id.to_string(),
                    manifest.status.as_str(),
                    manifest.finished_at.as_ref().map(ts),
                    counts.fetched as i64,
                    counts.new as i64,
                    counts.changed as i64,
                    counts.unchanged as i64,
                    counts.failed as i64,
                    manifest.error.as_deref(),
                ],
            )
            .await
            .map_err(LexCrawlError::persistence)?;

        if affected == 0 {
            return Err(LexCrawlError::persistence(format!(
                "run manifest {} not found",
                manifest.id
            )));
        }
        Ok(())
    }

    pub async fn get_run_manifest(&self, id: &RunId) -> Result<Option<RunManifest>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {MANIFEST_COLUMNS} FROM run_manifests WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(LexCrawlError::persistence)?;

        match rows.next().await.map_err(LexCrawlError::persistence)? {
            Some(row) => Ok(Some(row_to_manifest(&row)?)),
            None => Ok(None),
        }
    }

    /// The most recently started run, if any. UUID v7 ids sort by time.
    pub async fn latest_run_manifest(&self) -> Result<Option<RunManifest>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {MANIFEST_COLUMNS} FROM run_manifests ORDER BY id DESC LIMIT 1"),
                params![],
            )
            .await
            .map_err(LexCrawlError::persistence)?;

        match rows.next().await.map_err(LexCrawlError::persistence)? {
            Some(row) => Ok(Some(row_to_manifest(&row)?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Target errors
    // -----------------------------------------------------------------------

    pub async fn insert_target_error(
        &self,
        run_id: &RunId,
        url: &str,
        kind: &str,
        message: &str,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO target_errors (run_id, url, kind, message, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id.to_string(), url, kind, message, ts(&Utc::now())],
            )
            .await
            .map_err(LexCrawlError::persistence)?;
        Ok(())
    }

    pub async fn list_target_errors(&self, run_id: &RunId) -> Result<Vec<TargetError>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, url, kind, message, occurred_at
                 FROM target_errors WHERE run_id = ?1 ORDER BY id",
                params![run_id.to_string()],
            )
            .await
            .map_err(LexCrawlError::persistence)?;

        let mut errors = Vec::new();
        while let Some(row) = rows.next().await.map_err(LexCrawlError::persistence)? {
            errors.push(TargetError {
                run_id: row.get(0).map_err(LexCrawlError::persistence)?,
                url: row.get(1).map_err(LexCrawlError::persistence)?,
                kind: row.get(2).map_err(LexCrawlError::persistence)?,
                message: row.get(3).map_err(LexCrawlError::persistence)?,
                occurred_at: parse_ts(&row.get::<String>(4).map_err(LexCrawlError::persistence)?)?,
            });
        }
        Ok(errors)
    }
}

// ---------------------------------------------------------------------------
// Command application
// ---------------------------------------------------------------------------

/// Apply one command on an open connection or transaction.
///
/// The version bump and `last_changed_at` are derived from the stored row,
/// so applying the same upsert twice leaves the record unchanged.
async fn apply_command(conn: &Connection, command: &WriteCommand) -> Result<()> {
    match command {
        WriteCommand::Upsert {
            record, document, ..
        } => {
            if record.fingerprint != document.fingerprint || record.doc_id != document.doc_id {
                return Err(LexCrawlError::persistence(format!(
                    "document {} does not match its fingerprint record",
                    document.doc_id
                )));
            }

            conn.execute(
                "INSERT INTO fingerprints (doc_id, source_id, url, fingerprint, first_seen_at,
                                           last_seen_at, last_changed_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
                 ON CONFLICT(doc_id) DO UPDATE SET
                   source_id = excluded.source_id,
                   url = excluded.url,
                   version = CASE WHEN fingerprints.fingerprint = excluded.fingerprint
                                  THEN fingerprints.version
                                  ELSE fingerprints.version + 1 END,
                   last_changed_at = CASE WHEN fingerprints.fingerprint = excluded.fingerprint
                                          THEN fingerprints.last_changed_at
                                          ELSE excluded.last_changed_at END,
                   fingerprint = excluded.fingerprint,
                   last_seen_at = excluded.last_seen_at",
                params![
                    record.doc_id.as_str(),
                    record.source_id.as_str(),
                    record.url.as_str(),
                    record.fingerprint.as_str(),
                    ts(&record.first_seen_at),
                    ts(&record.last_seen_at),
                    ts(&record.last_changed_at),
                ],
            )
            .await
            .map_err(LexCrawlError::persistence)?;

            let sections_json =
                serde_json::to_string(&document.sections).map_err(LexCrawlError::persistence)?;
            let tokens_json =
                serde_json::to_string(&document.tokens).map_err(LexCrawlError::persistence)?;

            conn.execute(
                "INSERT INTO documents (doc_id, source_id, url, title, published_at, author, body,
                                        sections_json, tokens_json, language, model_version,
                                        fingerprint, extracted_at, schema_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(doc_id) DO UPDATE SET
                   source_id = excluded.source_id,
                   url = excluded.url,
                   title = excluded.title,
                   published_at = excluded.published_at,
                   author = excluded.author,
                   body = excluded.body,
                   sections_json = excluded.sections_json,
                   tokens_json = excluded.tokens_json,
                   language = excluded.language,
                   model_version = excluded.model_version,
                   fingerprint = excluded.fingerprint,
                   extracted_at = excluded.extracted_at,
                   schema_version = excluded.schema_version",
                params![
                    document.doc_id.as_str(),
                    document.source_id.as_str(),
                    document.url.as_str(),
                    document.title.as_str(),
                    document.published_at.as_deref(),
                    document.author.as_deref(),
                    document.body.as_str(),
                    sections_json,
                    tokens_json,
                    document.language.as_str(),
                    document.model_version.as_str(),
                    document.fingerprint.as_str(),
                    ts(&document.extracted_at),
                    i64::from(document.schema_version),
                ],
            )
            .await
            .map_err(LexCrawlError::persistence)?;
        }
        WriteCommand::Touch { doc_id, seen_at } => {
            conn.execute(
                "UPDATE fingerprints SET last_seen_at = ?2 WHERE doc_id = ?1",
                params![doc_id.as_str(), ts(seen_at)],
            )
            .await
            .map_err(LexCrawlError::persistence)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

const DOCUMENT_COLUMNS: &str = "doc_id, source_id, url, title, published_at, author, body, \
     sections_json, tokens_json, language, model_version, fingerprint, extracted_at, schema_version";

const MANIFEST_COLUMNS: &str = "id, mode, status, started_at, finished_at, fetched, new_count, \
     changed, unchanged, failed, error";

/// Fixed-width RFC 3339 so that text comparison orders timestamps.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LexCrawlError::persistence(format!("invalid date '{s}': {e}")))
}

fn get_string(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx).map_err(LexCrawlError::persistence)
}

fn row_to_fingerprint(row: &libsql::Row) -> Result<FingerprintRecord> {
    Ok(FingerprintRecord {
        doc_id: DocId::from_stored(get_string(row, 0)?),
        source_id: get_string(row, 1)?,
        url: get_string(row, 2)?,
        fingerprint: Fingerprint::from_stored(get_string(row, 3)?),
        first_seen_at: parse_ts(&get_string(row, 4)?)?,
        last_seen_at: parse_ts(&get_string(row, 5)?)?,
        last_changed_at: parse_ts(&get_string(row, 6)?)?,
        version: row.get::<u32>(7).map_err(LexCrawlError::persistence)?,
    })
}

fn row_to_document(row: &libsql::Row) -> Result<Document> {
    let sections: Vec<String> = serde_json::from_str(&get_string(row, 7)?)
        .map_err(|e| LexCrawlError::persistence(format!("invalid sections_json: {e}")))?;
    let tokens: Vec<String> = serde_json::from_str(&get_string(row, 8)?)
        .map_err(|e| LexCrawlError::persistence(format!("invalid tokens_json: {e}")))?;

    Ok(Document {
        doc_id: DocId::from_stored(get_string(row, 0)?),
        source_id: get_string(row, 1)?,
        url: get_string(row, 2)?,
        title: get_string(row, 3)?,
        published_at: row.get::<String>(4).ok(),
        author: row.get::<String>(5).ok(),
        body: get_string(row, 6)?,
        sections,
        tokens,
        language: get_string(row, 9)?,
        model_version: get_string(row, 10)?,
        fingerprint: Fingerprint::from_stored(get_string(row, 11)?),
        extracted_at: parse_ts(&get_string(row, 12)?)?,
        schema_version: row.get::<u32>(13).map_err(LexCrawlError::persistence)?,
    })
}

fn row_to_manifest(row: &libsql::Row) -> Result<RunManifest> {
    let id = get_string(row, 0)?;
    let count = |idx: i32| -> Result<u64> {
        Ok(row.get::<i64>(idx).map_err(LexCrawlError::persistence)? as u64)
    };

    Ok(RunManifest {
        id: id
            .parse()
            .map_err(|e| LexCrawlError::persistence(format!("invalid run id '{id}': {e}")))?,
        mode: get_string(row, 1)?.parse()?,
        status: get_string(row, 2)?.parse()?,
        started_at: parse_ts(&get_string(row, 3)?)?,
        finished_at: match row.get::<String>(4).ok() {
            Some(s) => Some(parse_ts(&s)?),
            None => None,
        },
        counts: RunCounts {
            fetched: count(5)?,
            new: count(6)?,
            changed: count(7)?,
            unchanged: count(8)?,
            failed: count(9)?,
        },
        error: row.get::<String>(10).ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lexcrawl_shared::{
        CURRENT_SCHEMA_VERSION, ExtractionRules, FetchStrategy, RunMode, RunStatus,
    };
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("lexcrawl_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn source(id: &str, active: bool) -> SourceConfig {
        SourceConfig {
            id: id.into(),
            name: format!("{id} laws"),
            language: Some("fa".into()),
            active,
            strategy: FetchStrategy::SeedList {
                urls: vec![format!("https://{id}.example.ir/doc/1")],
            },
            rules: ExtractionRules::default(),
        }
    }

    fn upsert(url: &str, body: &str, at: DateTime<Utc>) -> WriteCommand {
        let doc_id = DocId::parse(url).unwrap();
        let fingerprint = Fingerprint::of(body);
        WriteCommand::Upsert {
            record: FingerprintRecord {
                doc_id: doc_id.clone(),
                source_id: "majlis".into(),
                url: url.into(),
                fingerprint: fingerprint.clone(),
                first_seen_at: at,
                last_seen_at: at,
                last_changed_at: at,
                version: 1,
            },
            document: Document {
                doc_id,
                source_id: "majlis".into(),
                url: url.into(),
                title: "قانون نمونه".into(),
                published_at: Some("۱۴۰۲/۰۵/۱۰".into()),
                author: None,
                body: body.into(),
                sections: vec!["ماده ۱".into()],
                tokens: vec!["قانون".into(), "نمونه".into()],
                language: "fa".into(),
                model_version: "rule-based/1".into(),
                fingerprint,
                extracted_at: at,
                schema_version: CURRENT_SCHEMA_VERSION,
            },
            classification: Classification::New,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("lexcrawl_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.schema_version().await, 1);
    }

    #[tokio::test]
    async fn source_registration() {
        let storage = test_storage().await;
        storage.upsert_source(&source("majlis", true)).await.unwrap();
        storage.upsert_source(&source("gazette", false)).await.unwrap();

        let active = storage.list_active_sources().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "majlis");

        // Re-registering replaces the definition.
        storage.upsert_source(&source("gazette", true)).await.unwrap();
        assert_eq!(storage.list_active_sources().await.unwrap().len(), 2);
        assert_eq!(storage.list_sources().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upsert_bumps_version_only_on_change() {
        let storage = test_storage().await;
        let url = "https://law.example.ir/laws/1";
        let t0 = Utc::now();

        storage.apply_commit(&upsert(url, "متن اول", t0)).await.unwrap();
        let doc_id = DocId::parse(url).unwrap();
        let rec = storage.get_fingerprint(&doc_id).await.unwrap().unwrap();
        assert_eq!(rec.version, 1);

        // Same content again: idempotent.
        let t1 = t0 + Duration::hours(1);
        storage.apply_commit(&upsert(url, "متن اول", t1)).await.unwrap();
        let rec = storage.get_fingerprint(&doc_id).await.unwrap().unwrap();
        assert_eq!(rec.version, 1);
        assert_eq!(rec.last_changed_at, rec.first_seen_at);

        // Different content: exactly one bump.
        let t2 = t0 + Duration::hours(2);
        storage.apply_commit(&upsert(url, "متن دوم", t2)).await.unwrap();
        let rec = storage.get_fingerprint(&doc_id).await.unwrap().unwrap();
        assert_eq!(rec.version, 2);
        assert_eq!(rec.fingerprint, Fingerprint::of("متن دوم"));
        assert!(rec.last_changed_at > rec.first_seen_at);

        let doc = storage.get_document(&doc_id).await.unwrap().unwrap();
        assert_eq!(doc.body, "متن دوم");
        assert_eq!(doc.fingerprint, rec.fingerprint);
        assert_eq!(doc.sections, vec!["ماده ۱".to_string()]);
    }

    #[tokio::test]
    async fn touch_updates_last_seen_only() {
        let storage = test_storage().await;
        let url = "https://law.example.ir/laws/2";
        let t0 = Utc::now();
        storage.apply_commit(&upsert(url, "body", t0)).await.unwrap();

        let doc_id = DocId::parse(url).unwrap();
        let later = t0 + Duration::days(3);
        storage
            .apply_commit(&WriteCommand::Touch {
                doc_id: doc_id.clone(),
                seen_at: later,
            })
            .await
            .unwrap();

        let rec = storage.get_fingerprint(&doc_id).await.unwrap().unwrap();
        assert_eq!(rec.version, 1);
        assert_eq!(ts(&rec.last_seen_at), ts(&later));
        assert_eq!(rec.last_changed_at, rec.first_seen_at);
    }

    #[tokio::test]
    async fn batch_rolls_back_on_mismatch() {
        let storage = test_storage().await;
        let good = upsert("https://law.example.ir/laws/3", "one", Utc::now());
        let mut bad = upsert("https://law.example.ir/laws/4", "two", Utc::now());
        if let WriteCommand::Upsert { document, .. } = &mut bad {
            document.fingerprint = Fingerprint::of("something else");
        }

        assert!(storage.apply_batch(&[good.clone(), bad]).await.is_err());
        assert_eq!(storage.count_documents().await.unwrap(), 0);
        assert!(storage.list_fingerprints().await.unwrap().is_empty());

        storage.apply_batch(&[good]).await.unwrap();
        assert_eq!(storage.count_documents().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_fingerprints_and_clear() {
        let storage = test_storage().await;
        let now = Utc::now();
        storage
            .apply_batch(&[
                upsert("https://law.example.ir/a", "a", now - Duration::days(10)),
                upsert("https://law.example.ir/b", "b", now),
            ])
            .await
            .unwrap();

        let stale = storage
            .list_stale_fingerprints(now - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].url, "https://law.example.ir/a");

        let all = storage
            .list_stale_fingerprints(now + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        storage.clear_crawl_state().await.unwrap();
        assert!(storage.list_fingerprints().await.unwrap().is_empty());
        assert!(storage.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_manifest_lifecycle() {
        let storage = test_storage().await;
        let mut manifest = RunManifest {
            id: RunId::new(),
            mode: RunMode::Incremental,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            counts: RunCounts::default(),
            error: None,
        };
        storage.insert_run_manifest(&manifest).await.unwrap();

        storage
            .insert_target_error(&manifest.id, "https://law.example.ir/x", "permanent_fetch", "HTTP 404")
            .await
            .unwrap();

        manifest.status = RunStatus::Done;
        manifest.finished_at = Some(Utc::now());
        manifest.counts = RunCounts {
            fetched: 3,
            new: 1,
            changed: 1,
            unchanged: 0,
            failed: 1,
        };
        storage.finish_run_manifest(&manifest).await.unwrap();

        let latest = storage.latest_run_manifest().await.unwrap().unwrap();
        assert_eq!(latest.id, manifest.id);
        assert_eq!(latest.status, RunStatus::Done);
        assert_eq!(latest.mode, RunMode::Incremental);
        assert_eq!(latest.counts, manifest.counts);
        assert!(latest.finished_at.is_some());

        let errors = storage.list_target_errors(&manifest.id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, "permanent_fetch");
    }

    #[tokio::test]
    async fn second_connection_sees_committed_writes() {
        let storage = test_storage().await;
        let writer = storage.connect_again().await.unwrap();
        writer
            .apply_commit(&upsert("https://law.example.ir/c", "c", Utc::now()))
            .await
            .unwrap();
        assert_eq!(storage.count_documents().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("lexcrawl_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.upsert_source(&source("majlis", true)).await.is_err());
        assert!(ro.latest_run_manifest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("lexcrawl_missing_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }
}
