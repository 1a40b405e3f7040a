//! Incremental crawl engine for lexcrawl.
//!
//! This crate ties the frontier, fetcher pool, extractor, normalizer and
//! storage together into a single run (see [`Coordinator`]).

pub mod coordinator;
pub mod detector;
pub mod seed;
pub mod writer;

pub use coordinator::{Coordinator, ProgressReporter, RunOptions, RunPhase, SilentProgress};
pub use detector::{ChangeDetector, Detection};
pub use seed::{SeedFile, apply_seed, load_seed_file};
pub use writer::{PersistenceWriter, WriterHandle, WriterReport};
