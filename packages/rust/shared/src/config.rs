//! Application configuration for lexcrawl.
//!
//! User config lives at `~/.lexcrawl/lexcrawl.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LexCrawlError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "lexcrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".lexcrawl";

// ---------------------------------------------------------------------------
// Config structs (matching lexcrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Fetching, frontier and failure policy.
    #[serde(default)]
    pub crawl: CrawlSettings,

    /// Persistence writer batching.
    #[serde(default)]
    pub writer: WriterSettings,

    #[serde(default)]
    pub normalizer: NormalizerSettings,

    /// Seed file used by `--seed`.
    #[serde(default)]
    pub seed: SeedSettings,

    /// Sources registered at every run start.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl DatabaseConfig {
    /// Resolve the configured path, expanding a leading `~/`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        expand_home(&self.path)
    }
}

fn default_database_path() -> String {
    "~/.lexcrawl/lexcrawl.db".into()
}

/// Upper bound for `crawl.recheck_interval_hours` (100 years).
pub const MAX_RECHECK_INTERVAL_HOURS: u64 = 24 * 365 * 100;

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Number of concurrent fetch workers.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Maximum link depth from a source's entry point.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of targets accepted into the frontier per run.
    #[serde(default = "default_max_targets")]
    pub max_targets: usize,

    /// Delay before each request, in milliseconds.
    #[serde(default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Total attempts per target, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Incremental runs re-check recorded documents last seen longer ago
    /// than this. Unset means every recorded document is re-checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recheck_interval_hours: Option<u64>,

    /// A run whose failed/processed ratio exceeds this finishes `failed`.
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,

    /// Whole-run timeout. Unset means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,

    /// Permit loopback and private-network hosts (tests, intranet mirrors).
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// Honour each host's robots.txt rules and `Crawl-delay`.
    #[serde(default = "default_true")]
    pub respect_robots: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            max_depth: default_max_depth(),
            max_targets: default_max_targets(),
            politeness_delay_ms: default_politeness_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            recheck_interval_hours: None,
            max_failure_rate: default_max_failure_rate(),
            run_timeout_secs: None,
            allow_private_hosts: false,
            respect_robots: true,
            user_agent: default_user_agent(),
        }
    }
}

impl CrawlSettings {
    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Last-seen cutoff for incremental re-checks, or `None` when every
    /// recorded document is re-checked.
    pub fn recheck_cutoff(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let Some(hours) = self.recheck_interval_hours else {
            return Ok(None);
        };
        i64::try_from(hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .and_then(|interval| now.checked_sub_signed(interval))
            .map(Some)
            .ok_or_else(|| {
                LexCrawlError::config(format!(
                    "crawl.recheck_interval_hours {hours} is out of range"
                ))
            })
    }

    /// Backoff before retry number `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `backoff_max_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

fn default_max_threads() -> usize {
    4
}
fn default_max_depth() -> u32 {
    5
}
fn default_max_targets() -> usize {
    10_000
}
fn default_politeness_delay_ms() -> u64 {
    1_000
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_max_failure_rate() -> f64 {
    0.5
}
fn default_user_agent() -> String {
    format!("lexcrawl/{}", env!("CARGO_PKG_VERSION"))
}

/// `[writer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterSettings {
    /// Commits applied per transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Capacity of the bounded channel feeding the writer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Attempts for a commit re-applied on its own after a batch failure.
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
            max_commit_attempts: default_max_commit_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    32
}
fn default_queue_capacity() -> usize {
    256
}
fn default_max_commit_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    200
}

/// `[normalizer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerSettings {
    /// Language used for sources that do not declare one.
    #[serde(default = "default_language")]
    pub default_language: String,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            default_language: default_language(),
        }
    }
}

fn default_language() -> String {
    "fa".into()
}

/// `[seed]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSettings {
    #[serde(default = "default_seed_file")]
    pub file: String,
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            file: default_seed_file(),
        }
    }
}

fn default_seed_file() -> String {
    "seed.json".into()
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// `[[sources]]` entry: one crawlable legal-document site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable identifier, used as the primary key in `sources`.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Language tag passed to the normalizer. Falls back to
    /// `[normalizer] default_language` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default = "default_true")]
    pub active: bool,

    pub strategy: FetchStrategy,

    #[serde(default)]
    pub rules: ExtractionRules,
}

fn default_true() -> bool {
    true
}

/// How a source's documents are discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchStrategy {
    /// A paginated listing page linking to documents.
    Listing {
        listing_url: String,
        /// CSS selector matching document links on the listing page.
        link_selector: String,
        /// CSS selector for the "next page" link.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_page_selector: Option<String>,
        /// Only links matching this regex become document targets.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        document_pattern: Option<String>,
    },
    /// A fixed list of document URLs.
    SeedList { urls: Vec<String> },
}

impl FetchStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Listing { .. } => "listing",
            Self::SeedList { .. } => "seed_list",
        }
    }
}

/// Per-source CSS selector rules. Unset selectors fall back to the
/// generic heuristics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Container holding the document body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Selector for section headings inside the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<String>,

    /// Extra boilerplate selectors removed before extraction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strip: Vec<String>,

    /// Also discover links on document pages.
    #[serde(default)]
    pub follow_links: bool,
}

impl SourceConfig {
    /// The language tag this source's documents are normalized with.
    pub fn language_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.language.as_deref().unwrap_or(default)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let crawl = &self.crawl;
        if crawl.max_threads == 0 {
            return Err(LexCrawlError::config("crawl.max_threads must be at least 1"));
        }
        if crawl.max_attempts == 0 {
            return Err(LexCrawlError::config("crawl.max_attempts must be at least 1"));
        }
        if crawl
            .recheck_interval_hours
            .is_some_and(|hours| hours > MAX_RECHECK_INTERVAL_HOURS)
        {
            return Err(LexCrawlError::config(format!(
                "crawl.recheck_interval_hours must be at most {MAX_RECHECK_INTERVAL_HOURS}"
            )));
        }
        if !(0.0..=1.0).contains(&crawl.max_failure_rate) {
            return Err(LexCrawlError::config(format!(
                "crawl.max_failure_rate must be within [0, 1], got {}",
                crawl.max_failure_rate
            )));
        }
        if self.writer.batch_size == 0 || self.writer.queue_capacity == 0 {
            return Err(LexCrawlError::config(
                "writer.batch_size and writer.queue_capacity must be at least 1",
            ));
        }
        if self.writer.max_commit_attempts == 0 {
            return Err(LexCrawlError::config(
                "writer.max_commit_attempts must be at least 1",
            ));
        }
        validate_sources(&self.sources)
    }
}

/// Check a set of source definitions for duplicate ids, bad URLs and bad
/// patterns. Shared by config validation and the seed loader.
pub fn validate_sources(sources: &[SourceConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for source in sources {
        if source.id.trim().is_empty() {
            return Err(LexCrawlError::config("source id must not be empty"));
        }
        if !seen.insert(source.id.as_str()) {
            return Err(LexCrawlError::config(format!(
                "duplicate source id '{}'",
                source.id
            )));
        }
        match &source.strategy {
            FetchStrategy::Listing {
                listing_url,
                document_pattern,
                ..
            } => {
                url::Url::parse(listing_url).map_err(|e| {
                    LexCrawlError::config(format!(
                        "source '{}': invalid listing_url '{listing_url}': {e}",
                        source.id
                    ))
                })?;
                if let Some(pattern) = document_pattern {
                    regex::Regex::new(pattern).map_err(|e| {
                        LexCrawlError::config(format!(
                            "source '{}': invalid document_pattern: {e}",
                            source.id
                        ))
                    })?;
                }
            }
            FetchStrategy::SeedList { urls } => {
                for raw in urls {
                    url::Url::parse(raw).map_err(|e| {
                        LexCrawlError::config(format!(
                            "source '{}': invalid seed URL '{raw}': {e}",
                            source.id
                        ))
                    })?;
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.lexcrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| LexCrawlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.lexcrawl/lexcrawl.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LexCrawlError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LexCrawlError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LexCrawlError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LexCrawlError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LexCrawlError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| LexCrawlError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
