//! Persistence writer: the single task that mutates fingerprints and
//! documents.
//!
//! Workers send [`WriteCommand`]s through a bounded channel. The writer
//! groups up to `batch_size` of them into one transaction. When a batch
//! fails it is rolled back and every command is re-applied on its own with
//! bounded retries, so one bad commit cannot hide behind its neighbours.
//! A commit that still fails cancels the run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use lexcrawl_crawler::RunCounters;
use lexcrawl_shared::{Classification, LexCrawlError, Result, WriterSettings};
use lexcrawl_storage::{Storage, WriteCommand};

/// Sending half handed to workers.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteCommand>,
}

impl WriterHandle {
    /// Queue a command, waiting while the channel is full.
    pub async fn commit(&self, command: WriteCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| LexCrawlError::persistence("persistence writer has stopped"))
    }
}

/// What the writer task reports once its channel closes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriterReport {
    pub committed: u64,
    pub batches: u64,
    /// Set when a commit failed after all retries.
    pub escalation: Option<String>,
}

pub struct PersistenceWriter {
    storage: Storage,
    settings: WriterSettings,
    counters: Arc<RunCounters>,
    cancel: CancellationToken,
}

impl PersistenceWriter {
    pub fn new(
        storage: Storage,
        settings: WriterSettings,
        counters: Arc<RunCounters>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            storage,
            settings,
            counters,
            cancel,
        }
    }

    /// Start the writer task. It ends when every [`WriterHandle`] is
    /// dropped and the queue is flushed, or right after an escalation.
    pub fn spawn(self) -> (WriterHandle, JoinHandle<WriterReport>) {
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let task = tokio::spawn(self.run(rx));
        (WriterHandle { tx }, task)
    }

    async fn run(self, mut rx: mpsc::Receiver<WriteCommand>) -> WriterReport {
        let batch_size = self.settings.batch_size.max(1);
        let mut report = WriterReport::default();
        let mut batch = Vec::with_capacity(batch_size);

        while rx.recv_many(&mut batch, batch_size).await > 0 {
            report.batches += 1;
            match self.flush(&batch).await {
                Ok(()) => report.committed += batch.len() as u64,
                Err(e) => {
                    error!(error = %e, "commit failed after retries, failing run");
                    report.escalation = Some(e.to_string());
                    self.cancel.cancel();
                    break;
                }
            }
            batch.clear();
        }

        info!(
            committed = report.committed,
            batches = report.batches,
            "persistence writer finished"
        );
        report
    }

    #[instrument(skip_all, fields(size = batch.len()))]
    async fn flush(&self, batch: &[WriteCommand]) -> Result<()> {
        match self.storage.apply_batch(batch).await {
            Ok(()) => {
                batch.iter().for_each(|c| self.count(c));
                debug!("batch committed");
                return Ok(());
            }
            Err(e) if batch.len() == 1 => {
                warn!(error = %e, "commit failed, retrying");
            }
            Err(e) => {
                warn!(error = %e, "batch rolled back, applying commits one by one");
            }
        }

        for command in batch {
            self.commit_with_retry(command).await?;
            self.count(command);
        }
        Ok(())
    }

    /// Apply one command in its own transaction with exponential backoff.
    async fn commit_with_retry(&self, command: &WriteCommand) -> Result<()> {
        let max_attempts = self.settings.max_commit_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.storage.apply_commit(command).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= max_attempts => {
                    return Err(LexCrawlError::persistence(format!(
                        "commit for {} failed after {attempt} attempts: {e}",
                        command.doc_id()
                    )));
                }
                Err(e) => {
                    let delay = self.retry_delay(attempt);
                    debug!(doc_id = %command.doc_id(), attempt, error = %e, "retrying commit");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.settings.retry_base_ms.saturating_mul(factor))
    }

    fn count(&self, command: &WriteCommand) {
        let counter = match command.classification() {
            Classification::New => &self.counters.new,
            Classification::Changed => &self.counters.changed,
            Classification::Unchanged => &self.counters.unchanged,
        };
        RunCounters::incr(counter);
    }
}
