//! Crawl frontier, fetcher pool, and content extraction.
//!
//! This crate provides:
//! - [`frontier`]: deduplicated, depth/count-bounded work queue with leases
//! - [`fetcher`]: HTTP fetching with retry/backoff and the concurrent worker pool
//! - [`extract`]: per-source HTML extraction rules and link discovery
//! - [`robots`]: per-host robots.txt rules and crawl delay
//! - [`scope`]: URL scope guard (scheme, private hosts) and priority scoring

pub mod extract;
pub mod fetcher;
pub mod frontier;
pub mod robots;
pub mod scope;

pub use extract::{
    ContentRules, ExtractedDocument, GenericRules, ListingLinks, ListingRules, RuleRegistry,
    SelectorRules, discover_links, extract,
};
pub use fetcher::{FetchHandler, FetchResult, Fetcher, FetcherPool, RunCounters, Throttle};
pub use frontier::{CrawlTarget, EnqueueOutcome, Frontier, Lease};
pub use robots::RobotsCache;
pub use scope::{UrlGuard, is_ssrf_target, priority_score};
