//! Shared types, error model, and configuration for lexcrawl.
//!
//! This crate is the foundation depended on by all other lexcrawl crates.
//! It provides:
//! - [`LexCrawlError`], the unified error type
//! - Domain types ([`DocId`], [`Fingerprint`], [`Document`], [`RunManifest`])
//! - Configuration ([`AppConfig`], [`SourceConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlSettings, DatabaseConfig, ExtractionRules, FetchStrategy, MAX_RECHECK_INTERVAL_HOURS,
    NormalizerSettings,
    SeedSettings, SourceConfig, WriterSettings, config_dir, config_file_path, expand_home,
    init_config, load_config, load_config_from, validate_sources,
};
pub use error::{LexCrawlError, Result};
pub use types::{
    CURRENT_SCHEMA_VERSION, Classification, DocId, Document, Fingerprint, FingerprintRecord,
    RunCounts, RunId, RunManifest, RunMode, RunStatus, TargetKind, canonicalize_url,
};
