//! HTTP fetching with retry, backoff, and a pool-wide throttle.
//!
//! [`Fetcher`] performs a single target fetch including retries.
//! [`FetcherPool`] runs N workers that drain a [`Frontier`] and hand every
//! outcome to a [`FetchHandler`] while the target's lease is still held.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, header};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use lexcrawl_shared::{CrawlSettings, Fingerprint, LexCrawlError, Result};

use crate::frontier::{CrawlTarget, Frontier};
use crate::robots::RobotsCache;
use crate::scope::UrlGuard;

// ---------------------------------------------------------------------------
// FetchResult
// ---------------------------------------------------------------------------

/// Raw content retrieved for one target.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub target: CrawlTarget,
    /// URL after redirects.
    pub final_url: Url,
    pub status: u16,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

// ---------------------------------------------------------------------------
// Run counters
// ---------------------------------------------------------------------------

/// Atomic per-run counters shared by workers and the writer.
#[derive(Debug, Default)]
pub struct RunCounters {
    pub fetched: AtomicU64,
    pub new: AtomicU64,
    pub changed: AtomicU64,
    pub unchanged: AtomicU64,
    pub failed: AtomicU64,
    /// Targets whose processing finished, successfully or not.
    pub processed: AtomicU64,
}

impl RunCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> lexcrawl_shared::RunCounts {
        lexcrawl_shared::RunCounts {
            fetched: self.fetched.load(Ordering::Relaxed),
            new: self.new.load(Ordering::Relaxed),
            changed: self.changed.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// failed ÷ processed, or 0 when nothing was processed.
    pub fn failure_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            return 0.0;
        }
        self.failed.load(Ordering::Relaxed) as f64 / processed as f64
    }
}

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// Pool-wide pause shared by all workers. Set on HTTP 429.
#[derive(Debug, Default)]
pub struct Throttle {
    paused_until: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Extend the pause to at least `now + delay`.
    pub fn pause(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut guard = self
            .paused_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_none_or(|current| current < until) {
            *guard = Some(until);
        }
    }

    /// Sleep until the current pause (if any) is over.
    pub async fn wait(&self) {
        loop {
            let until = *self
                .paused_until
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match until {
                Some(until) if until > Instant::now() => tokio::time::sleep_until(until).await,
                _ => return,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// HTTP client plus retry policy.
pub struct Fetcher {
    client: Client,
    settings: CrawlSettings,
    guard: UrlGuard,
    /// Set when `respect_robots` is on.
    robots: Option<RobotsCache>,
    throttle: Arc<Throttle>,
    requests: AtomicU64,
}

impl Fetcher {
    pub fn new(settings: &CrawlSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| LexCrawlError::Startup(format!("failed to build HTTP client: {e}")))?;

        let robots = settings
            .respect_robots
            .then(|| RobotsCache::new(client.clone(), &settings.user_agent));

        Ok(Self {
            client,
            settings: settings.clone(),
            guard: UrlGuard::new(settings.allow_private_hosts),
            robots,
            throttle: Arc::new(Throttle::default()),
            requests: AtomicU64::new(0),
        })
    }

    /// Total HTTP requests issued, including retries.
    pub fn requests_sent(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Fetch a target, retrying transient failures with exponential backoff.
    ///
    /// Returns [`LexCrawlError::Cancelled`] if `cancel` fires while waiting
    /// between attempts.
    #[instrument(skip_all, fields(url = %target.url))]
    pub async fn fetch(
        &self,
        target: &CrawlTarget,
        cancel: &CancellationToken,
    ) -> Result<FetchResult> {
        self.guard.check(&target.url)?;
        let crawl_delay = match &self.robots {
            Some(robots) => robots.check(&target.url).await?,
            None => None,
        };

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.wait_turn(crawl_delay, cancel).await?;

            let err = match self.fetch_once(&target.url).await {
                Ok((final_url, status, body)) => {
                    return Ok(FetchResult {
                        target: target.clone(),
                        final_url,
                        status,
                        fingerprint: Fingerprint::of(&body),
                        body,
                        fetched_at: Utc::now(),
                    });
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            let delay = self.settings.backoff_for(attempt);
            if let LexCrawlError::RateLimited { retry_after, .. } = &err {
                let pause = retry_after.unwrap_or(delay);
                warn!(attempt, pause_ms = pause.as_millis() as u64, "rate limited, pausing pool");
                self.throttle.pause(pause);
            }

            if attempt >= max_attempts {
                debug!(attempt, error = %err, "giving up");
                return Err(err);
            }

            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            if !matches!(err, LexCrawlError::RateLimited { .. }) {
                sleep_or_cancel(delay, cancel).await?;
            }
            attempt += 1;
        }
    }

    /// Honour the pool-wide pause and the politeness delay, raised to the
    /// host's robots.txt `Crawl-delay` when that is longer.
    async fn wait_turn(
        &self,
        crawl_delay: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LexCrawlError::Cancelled),
            _ = self.throttle.wait() => {}
        }
        let delay = self
            .settings
            .politeness_delay()
            .max(crawl_delay.unwrap_or_default());
        if !delay.is_zero() {
            sleep_or_cancel(delay, cancel).await?;
        }
        Ok(())
    }

    async fn fetch_once(&self, url: &Url) -> Result<(Url, u16, String)> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        let status = response.status();
        let final_url = response.url().clone();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LexCrawlError::RateLimited {
                url: url.to_string(),
                retry_after,
            });
        }

        if !status.is_success() {
            let message = format!("HTTP {status}");
            return Err(
                if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
                    LexCrawlError::transient(url.as_str(), message)
                } else {
                    LexCrawlError::permanent(url.as_str(), message)
                },
            );
        }

        // Redirects may leave the allowed host set.
        self.guard.check(&final_url)?;

        let body = response
            .text()
            .await
            .map_err(|e| LexCrawlError::transient(url.as_str(), format!("body read failed: {e}")))?;

        Ok((final_url, status.as_u16(), body))
    }
}

fn classify_request_error(url: &Url, e: &reqwest::Error) -> LexCrawlError {
    if e.is_builder() {
        LexCrawlError::permanent(url.as_str(), e.to_string())
    } else {
        // timeouts, connect/reset, redirect loops and the rest
        LexCrawlError::transient(url.as_str(), e.to_string())
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LexCrawlError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Receives every fetch outcome on the worker that fetched it.
///
/// The target's lease is held until the returned future completes, so any
/// links enqueued from here keep the frontier from draining early.
pub trait FetchHandler: Send + Sync + 'static {
    fn handle(
        &self,
        target: &CrawlTarget,
        outcome: Result<FetchResult>,
    ) -> impl Future<Output = ()> + Send;
}

/// Bounded set of concurrent fetch workers.
pub struct FetcherPool {
    fetcher: Arc<Fetcher>,
    counters: Arc<RunCounters>,
}

impl FetcherPool {
    pub fn new(fetcher: Arc<Fetcher>, counters: Arc<RunCounters>) -> Self {
        Self { fetcher, counters }
    }

    /// Start `concurrency` workers and wait until the frontier is drained or
    /// closed, or `cancel` fires.
    #[instrument(skip_all, fields(concurrency = concurrency))]
    pub async fn run<H: FetchHandler>(
        &self,
        concurrency: usize,
        frontier: Arc<Frontier>,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) {
        let mut workers = tokio::task::JoinSet::new();

        for worker_id in 0..concurrency.max(1) {
            let fetcher = Arc::clone(&self.fetcher);
            let counters = Arc::clone(&self.counters);
            let frontier = Arc::clone(&frontier);
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();

            workers.spawn(async move {
                loop {
                    // Cancellation wins over queued work.
                    let lease = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        lease = frontier.dequeue() => lease,
                    };
                    let Some(lease) = lease else { break };
                    let target = lease.target();

                    let outcome = fetcher.fetch(target, &cancel).await;
                    match &outcome {
                        Err(LexCrawlError::Cancelled) => {
                            debug!(worker_id, url = %target.url, "cancelled before fetch finished");
                            continue;
                        }
                        Ok(_) => RunCounters::incr(&counters.fetched),
                        Err(e) => {
                            warn!(worker_id, url = %target.url, error = %e, "fetch failed");
                            RunCounters::incr(&counters.failed);
                        }
                    }

                    handler.handle(target, outcome).await;
                    RunCounters::incr(&counters.processed);
                }
                debug!(worker_id, "worker exiting");
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "fetch worker panicked");
            }
        }
    }
}
