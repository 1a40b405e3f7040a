//! SQL migration definitions for the lexcrawl database.
//!
//! Migrations are applied in order on database open. Each migration records
//! its version in `schema_migrations`.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: sources, fingerprints, documents, run_manifests, target_errors",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Registered crawl sources; config_json holds the full definition
CREATE TABLE IF NOT EXISTS sources (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    strategy    TEXT NOT NULL,
    language    TEXT,
    active      INTEGER NOT NULL DEFAULT 1,
    config_json TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- Last-known content fingerprint per document
CREATE TABLE IF NOT EXISTS fingerprints (
    doc_id          TEXT PRIMARY KEY,
    source_id       TEXT NOT NULL,
    url             TEXT NOT NULL,
    fingerprint     TEXT NOT NULL,
    first_seen_at   TEXT NOT NULL,
    last_seen_at    TEXT NOT NULL,
    last_changed_at TEXT NOT NULL,
    version         INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_fingerprints_last_seen ON fingerprints(last_seen_at);
CREATE INDEX IF NOT EXISTS idx_fingerprints_source ON fingerprints(source_id);

-- Extracted, normalized documents (one per fingerprint row)
CREATE TABLE IF NOT EXISTS documents (
    doc_id         TEXT PRIMARY KEY,
    source_id      TEXT NOT NULL,
    url            TEXT NOT NULL,
    title          TEXT NOT NULL,
    published_at   TEXT,
    author         TEXT,
    body           TEXT NOT NULL,
    sections_json  TEXT NOT NULL,
    tokens_json    TEXT NOT NULL,
    language       TEXT NOT NULL,
    model_version  TEXT NOT NULL,
    fingerprint    TEXT NOT NULL,
    extracted_at   TEXT NOT NULL,
    schema_version INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source_id);

-- One row per run, never deleted
CREATE TABLE IF NOT EXISTS run_manifests (
    id          TEXT PRIMARY KEY,
    mode        TEXT NOT NULL,
    status      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    fetched     INTEGER NOT NULL DEFAULT 0,
    new_count   INTEGER NOT NULL DEFAULT 0,
    changed     INTEGER NOT NULL DEFAULT 0,
    unchanged   INTEGER NOT NULL DEFAULT 0,
    failed      INTEGER NOT NULL DEFAULT 0,
    error       TEXT
);

-- Per-target failures
CREATE TABLE IF NOT EXISTS target_errors (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id      TEXT NOT NULL REFERENCES run_manifests(id),
    url         TEXT NOT NULL,
    kind        TEXT NOT NULL,
    message     TEXT NOT NULL,
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_target_errors_run ON target_errors(run_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
