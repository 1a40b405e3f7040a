//! Crawl coordinator: run mode, concurrency budget, and the run state
//! machine.
//!
//! ```text
//! Idle → Seeding → Running → Draining → Finalizing → Done
//!                                                  ↘ Failed (from any state)
//! ```
//!
//! Seeding registers sources and fills the frontier; Running drives the
//! fetcher pool until the frontier drains; Draining closes the writer
//! channel and waits for the last flush; Finalizing writes the manifest.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use lexcrawl_crawler::{
    CrawlTarget, EnqueueOutcome, FetchHandler, FetchResult, Fetcher, FetcherPool, Frontier,
    RuleRegistry, RunCounters, discover_links, extract,
};
use lexcrawl_shared::{
    AppConfig, CURRENT_SCHEMA_VERSION, Classification, Document, FetchStrategy, FingerprintRecord,
    LexCrawlError, Result, RunCounts, RunId, RunManifest, RunMode, RunStatus, SourceConfig,
    TargetKind,
};
use lexcrawl_storage::{Storage, WriteCommand};
use lexcrawl_text::Normalizer;

use crate::detector::ChangeDetector;
use crate::seed;
use crate::writer::{PersistenceWriter, WriterHandle, WriterReport};

// ---------------------------------------------------------------------------
// Phases & progress
// ---------------------------------------------------------------------------

/// States of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Seeding,
    Running,
    Draining,
    Finalizing,
    Done,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Seeding => "seeding",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when the run enters a new phase.
    fn phase(&self, phase: RunPhase);
    /// Called after every target, successful or not.
    fn target_finished(&self, url: &str, counts: &RunCounts);
    /// Called once the manifest is final.
    fn done(&self, manifest: &RunManifest);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _phase: RunPhase) {}
    fn target_finished(&self, _url: &str, _counts: &RunCounts) {}
    fn done(&self, _manifest: &RunManifest) {}
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Per-invocation options. Thread count and timeouts come from
/// [`AppConfig`], which the CLI has already merged with its flags.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Apply this seed file before crawling.
    pub seed_file: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            seed_file: None,
        }
    }
}

/// Everything compiled before the manifest exists. Failing here is a
/// startup error.
struct Prepared {
    sources: Vec<SourceConfig>,
    rules: RuleRegistry,
    fetcher: Fetcher,
    /// Incremental runs only.
    recheck_cutoff: Option<DateTime<Utc>>,
}

struct Execution {
    writer: WriterReport,
    timed_out: Option<Duration>,
    cancelled: bool,
}

pub struct Coordinator {
    config: AppConfig,
    storage: Arc<Storage>,
    normalizer: Normalizer,
    cancel: CancellationToken,
    phase: RunPhase,
}

impl Coordinator {
    pub fn new(config: AppConfig, storage: Storage) -> Self {
        Self {
            config,
            storage: Arc::new(storage),
            normalizer: Normalizer::rule_based(),
            cancel: CancellationToken::new(),
            phase: RunPhase::Idle,
        }
    }

    /// Replace the rule-based normalizer.
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Cancelling this token stops the current run; its manifest ends
    /// `cancelled`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn enter(&mut self, phase: RunPhase, progress: &dyn ProgressReporter) {
        debug!(from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
        progress.phase(phase);
    }

    /// Execute one run and return its final manifest.
    ///
    /// Startup errors (bad seed file, invalid rules, HTTP client) are
    /// returned as `Err` before any manifest is written. Anything after
    /// that is recorded on the manifest instead.
    #[instrument(skip_all, fields(mode = %options.mode))]
    pub async fn run(
        &mut self,
        options: &RunOptions,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<RunManifest> {
        self.enter(RunPhase::Seeding, &*progress);

        let prepared = match self.prepare(options).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.enter(RunPhase::Failed, &*progress);
                return Err(e);
            }
        };

        let mut manifest = RunManifest {
            id: RunId::new(),
            mode: options.mode,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            counts: RunCounts::default(),
            error: None,
        };
        if let Err(e) = self.storage.insert_run_manifest(&manifest).await {
            self.enter(RunPhase::Failed, &*progress);
            return Err(e);
        }
        info!(
            run_id = %manifest.id,
            sources = prepared.sources.len(),
            threads = self.config.crawl.max_threads,
            "run started"
        );

        // Child token: an escalation or timeout ends this run only.
        let cancel = self.cancel.child_token();
        let counters = Arc::new(RunCounters::default());
        let execution = self
            .execute(&manifest.id, options.mode, prepared, &counters, &cancel, &progress)
            .await;

        self.enter(RunPhase::Finalizing, &*progress);
        manifest.counts = counters.snapshot();
        manifest.finished_at = Some(Utc::now());
        let (status, error) = match execution {
            Ok(execution) => self.final_status(&execution, &counters),
            Err(e) => (RunStatus::Failed, Some(e.to_string())),
        };
        manifest.status = status;
        manifest.error = error;

        self.storage.finish_run_manifest(&manifest).await?;

        let terminal = if status.is_success() {
            RunPhase::Done
        } else {
            RunPhase::Failed
        };
        self.enter(terminal, &*progress);

        let counts = &manifest.counts;
        info!(
            run_id = %manifest.id,
            status = %manifest.status,
            fetched = counts.fetched,
            new = counts.new,
            changed = counts.changed,
            unchanged = counts.unchanged,
            failed = counts.failed,
            error = manifest.error.as_deref().unwrap_or(""),
            "run finished"
        );
        progress.done(&manifest);
        Ok(manifest)
    }

    /// Register sources and compile everything the run needs.
    async fn prepare(&self, options: &RunOptions) -> Result<Prepared> {
        if let Some(path) = &options.seed_file {
            seed::apply_seed(&self.storage, path).await?;
        }
        for source in &self.config.sources {
            self.storage.upsert_source(source).await?;
        }

        let sources = self.storage.list_active_sources().await?;
        if sources.is_empty() {
            warn!("no active sources registered; nothing to crawl");
        }

        let rules = RuleRegistry::from_sources(&sources)
            .map_err(|e| LexCrawlError::Startup(format!("invalid source rules: {e}")))?;
        let fetcher = Fetcher::new(&self.config.crawl)?;
        let recheck_cutoff = match options.mode {
            RunMode::Incremental => self.config.crawl.recheck_cutoff(Utc::now())?,
            RunMode::Full | RunMode::Recreate => None,
        };

        Ok(Prepared {
            sources,
            rules,
            fetcher,
            recheck_cutoff,
        })
    }

    async fn execute(
        &mut self,
        run_id: &RunId,
        mode: RunMode,
        prepared: Prepared,
        counters: &Arc<RunCounters>,
        cancel: &CancellationToken,
        progress: &Arc<dyn ProgressReporter>,
    ) -> Result<Execution> {
        if mode == RunMode::Recreate {
            self.storage.clear_crawl_state().await?;
            info!("cleared fingerprints and documents");
        }

        let crawl = &self.config.crawl;
        let frontier = Frontier::new(crawl.max_depth, crawl.max_targets);
        let seeded = self
            .seed_frontier(mode, &prepared.sources, prepared.recheck_cutoff, &frontier)
            .await?;
        info!(seeded, "frontier seeded");

        let writer_storage = self.storage.connect_again().await?;
        let (writer, writer_task) = PersistenceWriter::new(
            writer_storage,
            self.config.writer.clone(),
            Arc::clone(counters),
            cancel.clone(),
        )
        .spawn();

        let default_language = self.config.normalizer.default_language.clone();
        let languages = prepared
            .sources
            .iter()
            .map(|s| (s.id.clone(), s.language_or(&default_language).to_string()))
            .collect();
        let handler = CrawlHandler {
            run_id: run_id.clone(),
            storage: Arc::clone(&self.storage),
            detector: ChangeDetector::new(Arc::clone(&self.storage)),
            rules: prepared.rules,
            normalizer: self.normalizer.clone(),
            languages,
            default_language,
            frontier: Arc::clone(&frontier),
            writer,
            counters: Arc::clone(counters),
            progress: Arc::clone(progress),
        };

        let threads = self.config.crawl.max_threads;
        let run_timeout = self.config.crawl.run_timeout();
        self.enter(RunPhase::Running, &**progress);

        let pool = FetcherPool::new(Arc::new(prepared.fetcher), Arc::clone(counters));
        // The handler (and with it the last writer handle) is dropped when
        // the pool returns, which closes the writer channel.
        let run = pool.run(threads, Arc::clone(&frontier), Arc::new(handler), cancel.clone());
        tokio::pin!(run);

        let timer = async move {
            match run_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        let timed_out = tokio::select! {
            _ = &mut run => None,
            _ = timer => run_timeout,
        };
        if let Some(limit) = timed_out {
            warn!(limit_secs = limit.as_secs(), "run timeout reached, cancelling");
            cancel.cancel();
            run.await;
        }
        if cancel.is_cancelled() {
            frontier.close();
        }

        self.enter(RunPhase::Draining, &**progress);
        let writer = match writer_task.await {
            Ok(report) => report,
            Err(e) => WriterReport {
                escalation: Some(format!("persistence writer task failed: {e}")),
                ..WriterReport::default()
            },
        };

        Ok(Execution {
            writer,
            timed_out,
            cancelled: cancel.is_cancelled(),
        })
    }

    /// Seed listing pages and seed-list documents of every active source.
    /// Incremental runs also re-check previously recorded documents.
    async fn seed_frontier(
        &self,
        mode: RunMode,
        sources: &[SourceConfig],
        recheck_cutoff: Option<DateTime<Utc>>,
        frontier: &Frontier,
    ) -> Result<usize> {
        let mut seeded = 0;
        let mut push = |raw: &str, kind: TargetKind, source_id: &str| match Url::parse(raw) {
            Ok(url) => {
                let target = CrawlTarget::new(&url, kind, source_id, 0, None);
                if frontier.enqueue(target) == EnqueueOutcome::Queued {
                    seeded += 1;
                }
            }
            Err(e) => warn!(source_id, url = raw, error = %e, "skipping unparsable seed URL"),
        };

        for source in sources {
            match &source.strategy {
                FetchStrategy::Listing { listing_url, .. } => {
                    push(listing_url, TargetKind::Listing, &source.id);
                }
                FetchStrategy::SeedList { urls } => {
                    for raw in urls {
                        push(raw, TargetKind::Document, &source.id);
                    }
                }
            }
        }

        if mode == RunMode::Incremental {
            let records = match recheck_cutoff {
                Some(cutoff) => self.storage.list_stale_fingerprints(cutoff).await?,
                None => self.storage.list_fingerprints().await?,
            };
            let active: HashSet<&str> = sources.iter().map(|s| s.id.as_str()).collect();
            let mut rechecks = 0;
            for record in records
                .iter()
                .filter(|r| active.contains(r.source_id.as_str()))
            {
                push(&record.url, TargetKind::Document, &record.source_id);
                rechecks += 1;
            }
            debug!(rechecks, "queued recorded documents for re-check");
        }

        Ok(seeded)
    }

    fn final_status(
        &self,
        execution: &Execution,
        counters: &RunCounters,
    ) -> (RunStatus, Option<String>) {
        if let Some(reason) = &execution.writer.escalation {
            return (RunStatus::Failed, Some(reason.clone()));
        }
        if let Some(limit) = execution.timed_out {
            return (
                RunStatus::Failed,
                Some(format!("run timed out after {}s", limit.as_secs())),
            );
        }
        if execution.cancelled {
            return (RunStatus::Cancelled, Some("run cancelled".into()));
        }

        let rate = counters.failure_rate();
        let max = self.config.crawl.max_failure_rate;
        if rate > max {
            return (
                RunStatus::Failed,
                Some(format!("failure rate {rate:.2} exceeds max_failure_rate {max}")),
            );
        }
        (RunStatus::Done, None)
    }
}

// ---------------------------------------------------------------------------
// Per-target pipeline
// ---------------------------------------------------------------------------

/// Runs on the worker that fetched the target: detection, extraction,
/// normalization, then hand-off to the writer.
struct CrawlHandler {
    run_id: RunId,
    storage: Arc<Storage>,
    detector: ChangeDetector,
    rules: RuleRegistry,
    normalizer: Normalizer,
    languages: HashMap<String, String>,
    default_language: String,
    frontier: Arc<Frontier>,
    writer: WriterHandle,
    counters: Arc<RunCounters>,
    progress: Arc<dyn ProgressReporter>,
}

impl FetchHandler for CrawlHandler {
    async fn handle(&self, target: &CrawlTarget, outcome: Result<FetchResult>) {
        match outcome {
            // Already counted by the pool.
            Err(e) => self.record_error(target, &e).await,
            Ok(fetched) => {
                let processed = match target.kind {
                    TargetKind::Listing => {
                        self.expand_listing(&fetched);
                        Ok(())
                    }
                    TargetKind::Document => self.process_document(fetched).await,
                };
                if let Err(e) = processed {
                    warn!(url = %target.url, error = %e, "processing failed");
                    RunCounters::incr(&self.counters.failed);
                    self.record_error(target, &e).await;
                }
            }
        }
        self.progress
            .target_finished(target.url.as_str(), &self.counters.snapshot());
    }
}

impl CrawlHandler {
    async fn process_document(&self, fetched: FetchResult) -> Result<()> {
        let target = &fetched.target;
        let rules = self.rules.content_rules(&target.source_id);

        if rules.follow_links() {
            let links = discover_links(&fetched.body, &fetched.final_url)
                .into_iter()
                .filter(|link| link.host_str() == fetched.final_url.host_str());
            self.enqueue_children(target, links, TargetKind::Document);
        }

        let detection = self.detector.classify(&fetched).await?;
        let doc_id = target.doc_id();

        if detection.classification == Classification::Unchanged {
            return self
                .writer
                .commit(WriteCommand::Touch {
                    doc_id,
                    seen_at: fetched.fetched_at,
                })
                .await;
        }

        let extracted = extract(&fetched.body, &fetched.final_url, rules)?;
        let language = self
            .languages
            .get(&target.source_id)
            .unwrap_or(&self.default_language);
        let normalized = self.normalizer.normalize(&extracted.body, language)?;

        let url = target.url.to_string();
        let previous = detection.previous.as_ref();
        let record = FingerprintRecord {
            doc_id: doc_id.clone(),
            source_id: target.source_id.clone(),
            url: url.clone(),
            fingerprint: fetched.fingerprint.clone(),
            first_seen_at: previous.map_or(fetched.fetched_at, |p| p.first_seen_at),
            last_seen_at: fetched.fetched_at,
            last_changed_at: fetched.fetched_at,
            version: previous.map_or(1, |p| p.version + 1),
        };
        let document = Document {
            doc_id,
            source_id: target.source_id.clone(),
            url,
            title: extracted.title,
            published_at: extracted.published_at,
            author: extracted.author,
            body: extracted.body,
            sections: extracted.sections,
            tokens: normalized.tokens,
            language: normalized.language,
            model_version: normalized.model_version,
            fingerprint: fetched.fingerprint,
            extracted_at: Utc::now(),
            schema_version: CURRENT_SCHEMA_VERSION,
        };

        self.writer
            .commit(WriteCommand::Upsert {
                record,
                document,
                classification: detection.classification,
            })
            .await
    }

    /// Queue the documents (and next page) a listing links to.
    fn expand_listing(&self, fetched: &FetchResult) {
        let target = &fetched.target;
        let (documents, next_page) = match self.rules.listing_rules(&target.source_id) {
            Some(listing) => {
                let found = listing.discover(&fetched.body, &fetched.final_url);
                (found.documents, found.next_page)
            }
            None => {
                let same_host = discover_links(&fetched.body, &fetched.final_url)
                    .into_iter()
                    .filter(|link| link.host_str() == fetched.final_url.host_str())
                    .collect::<Vec<_>>();
                (same_host, None)
            }
        };

        let found = documents.len();
        let queued = self.enqueue_children(target, documents, TargetKind::Document)
            + self.enqueue_children(target, next_page, TargetKind::Listing);
        debug!(url = %target.url, found, queued, "listing expanded");
    }

    fn enqueue_children(
        &self,
        parent: &CrawlTarget,
        links: impl IntoIterator<Item = Url>,
        kind: TargetKind,
    ) -> usize {
        let mut queued = 0;
        for link in links {
            let child = CrawlTarget::new(
                &link,
                kind,
                parent.source_id.clone(),
                parent.depth + 1,
                Some(parent.url.clone()),
            );
            match self.frontier.enqueue(child) {
                EnqueueOutcome::Queued => queued += 1,
                EnqueueOutcome::Duplicate => {}
                other => debug!(url = %link, outcome = ?other, "link not queued"),
            }
        }
        queued
    }

    async fn record_error(&self, target: &CrawlTarget, error: &LexCrawlError) {
        if let Err(e) = self
            .storage
            .insert_target_error(
                &self.run_id,
                target.url.as_str(),
                error.kind(),
                &error.to_string(),
            )
            .await
        {
            warn!(url = %target.url, error = %e, "could not record target error");
        }
    }
}
