//! Core domain types shared by every lexcrawl crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::{LexCrawlError, Result};

/// Current schema version stamped on every persisted [`Document`].
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Document identity: the canonical form of the document URL.
///
/// Two URLs that differ only by fragment, host case, a trailing slash,
/// `utm_*` parameters or query-parameter order map to the same `DocId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Derive the identity of a parsed URL.
    pub fn from_url(url: &Url) -> Self {
        Self(canonicalize_url(url).to_string())
    }

    /// Parse and canonicalize a raw URL string.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| LexCrawlError::validation(format!("invalid URL '{raw}': {e}")))?;
        Ok(Self::from_url(&url))
    }

    /// Wrap a value read back from storage (already canonical).
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalize a URL for deduplication.
///
/// Strips the fragment, drops `utm_*` tracking parameters, sorts the remaining
/// query parameters and removes a trailing slash from non-root paths.
/// Scheme and host are already lower-cased by the `url` parser.
pub fn canonicalize_url(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let mut pairs: Vec<(String, String)> = canonical
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        canonical.set_query(None);
    } else {
        pairs.sort();
        canonical.query_pairs_mut().clear().extend_pairs(&pairs);
    }

    let trimmed = canonical.path().trim_end_matches('/').to_string();
    if !trimmed.is_empty() && trimmed != canonical.path() {
        canonical.set_path(&trimmed);
    }

    canonical
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a whitespace-canonicalized payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a raw payload. Runs of whitespace collapse to a single
    /// space and leading/trailing whitespace is ignored.
    pub fn of(payload: &str) -> Self {
        let mut hasher = Sha256::new();
        for (i, word) in payload.split_whitespace().enumerate() {
            if i > 0 {
                hasher.update(b" ");
            }
            hasher.update(word.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap a value read back from storage.
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Run mode / status / counts
// ---------------------------------------------------------------------------

/// How a run seeds its frontier and treats prior state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Crawl every configured source from scratch (prior state kept).
    Full,
    /// Crawl sources plus previously recorded documents past the re-check interval.
    Incremental,
    /// Wipe fingerprints and documents, then run as `Full`.
    Recreate,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Recreate => "recreate",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunMode {
    type Err = LexCrawlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            "recreate" => Ok(Self::Recreate),
            other => Err(LexCrawlError::validation(format!("unknown run mode '{other}'"))),
        }
    }
}

/// Terminal (or in-progress) status recorded on a [`RunManifest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Done,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the process should exit with status 0.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = LexCrawlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(LexCrawlError::validation(format!("unknown run status '{other}'"))),
        }
    }
}

/// Per-run counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub fetched: u64,
    pub new: u64,
    pub changed: u64,
    pub unchanged: u64,
    pub failed: u64,
}

/// Audit record for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub id: RunId,
    pub mode: RunMode,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: RunCounts,
    /// Run-level failure reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Crawl state records
// ---------------------------------------------------------------------------

/// Outcome of comparing a fetch against the fingerprint store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    New,
    Changed,
    Unchanged,
}

/// Whether a crawl target is a listing (link source) or a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Listing,
    Document,
}

/// Last-known fingerprint and crawl metadata for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub doc_id: DocId,
    pub source_id: String,
    pub url: String,
    pub fingerprint: Fingerprint,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    /// Starts at 1, bumped by exactly one on every detected change.
    pub version: u32,
}

/// An extracted and normalized legal document as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: DocId,
    pub source_id: String,
    pub url: String,
    pub title: String,
    /// Publish date exactly as found on the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub body: String,
    #[serde(default)]
    pub sections: Vec<String>,
    /// Normalized (lemmatized, stopword-free) token sequence.
    pub tokens: Vec<String>,
    pub language: String,
    /// Version string reported by the language toolkit.
    pub model_version: String,
    /// Fingerprint of the payload this body was extracted from.
    pub fingerprint: Fingerprint,
    pub extracted_at: DateTime<Utc>,
    pub schema_version: u32,
}
