//! Change notification pipeline
//!
//! ```text
//! WAL backlog ─┐
//!              ├─► filter::accepts ──► transform::project ──► Publisher
//! change feed ─┘    (Head, rev > 0)     {id, type, rev}        (retry)
//! ```
//!
//! The pipeline runs as a tokio task decoupled from the append path: appends
//! never wait for it, and a delivery failure never fails an append. Changes
//! are processed one at a time in commit order, so the notifications of one
//! stream are published in revision order.
//!
//! With a [`Checkpoint`] configured, the pipeline first reads back every
//! commit after the checkpoint from the WAL, then switches to the live feed.
//! The checkpoint only advances past a commit once all of its changes were
//! handled, and never past a notification that could not be delivered, so
//! after a restart those commits are notified again (at-least-once).

use crate::checkpoint::Checkpoint;
use crate::filter;
use crate::notification::CommitNotification;
use crate::publish::Publisher;
use crate::transform;
use evstore_core::{Error, Result};
use evstore_engine::{Database, EventStoreConfig, RetryConfig};
use evstore_storage::ChangeRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Notification channel identifier
    pub channel: String,
    /// Delivery backoff; unbounded by default, so delivery only stops at shutdown
    pub backoff: RetryConfig,
    /// Where progress is persisted; `None` observes only commits made after start
    pub checkpoint: Option<Checkpoint>,
}

impl PipelineConfig {
    /// Settings for `channel`: unbounded delivery retries, no checkpoint
    pub fn new(channel: impl Into<String>) -> Self {
        PipelineConfig {
            channel: channel.into(),
            backoff: RetryConfig::unbounded(),
            checkpoint: None,
        }
    }

    /// Settings derived from process configuration
    ///
    /// A durable store keeps its checkpoint next to its WAL.
    pub fn from_config(config: &EventStoreConfig) -> Self {
        let mut settings = Self::new(config.notification_channel.clone());
        settings.checkpoint = config.data_dir.as_ref().map(Checkpoint::in_dir);
        settings
    }

    /// Set the delivery backoff
    ///
    /// With a bounded policy a notification whose retries are spent is
    /// counted as failed and skipped for this run; the checkpoint stays
    /// before it.
    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Persist progress to `checkpoint`
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    /// Change records processed, from the backlog or the feed
    pub received: u64,
    /// Change records read back from the WAL at start
    pub replayed: u64,
    /// Changes discarded by the filter (Event rows, empty heads)
    pub filtered: u64,
    /// Notifications delivered
    pub published: u64,
    /// Undecodable changes, and notifications left undelivered
    pub failed: u64,
    /// Delivery attempts that were retried
    pub retries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    replayed: AtomicU64,
    filtered: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            received: self.received.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Commit-granular progress through the change stream
///
/// All rows of one commit share its sequence. A commit is finished when a
/// later sequence arrives or the pipeline stops cleanly.
struct Progress {
    checkpoint: Option<Checkpoint>,
    /// Highest commit whose changes were all handled
    finished: u64,
    /// Commit currently being handled
    current: u64,
    /// Set once a notification was left undelivered; freezes the checkpoint
    blocked: bool,
}

impl Progress {
    fn new(checkpoint: Option<Checkpoint>, resume_from: u64) -> Self {
        Progress {
            checkpoint,
            finished: resume_from,
            current: resume_from,
            blocked: false,
        }
    }

    /// Returns false for a change of an already finished commit
    fn begin(&mut self, sequence: u64) -> bool {
        if sequence <= self.finished {
            return false;
        }
        if sequence > self.current {
            self.finish();
            self.current = sequence;
        }
        true
    }

    fn finish(&mut self) {
        if self.current <= self.finished {
            return;
        }
        self.finished = self.current;
        if self.blocked {
            return;
        }
        if let Some(checkpoint) = &self.checkpoint {
            if let Err(e) = checkpoint.store(self.finished) {
                warn!(
                    target: "evstore::pipeline",
                    path = %checkpoint.path().display(),
                    sequence = self.finished,
                    error = %e,
                    "Checkpoint not saved"
                );
            }
        }
    }

    fn block(&mut self) {
        if !self.blocked {
            warn!(
                target: "evstore::pipeline",
                sequence = self.current,
                checkpoint = self.finished,
                "Checkpoint held back behind an undelivered notification"
            );
        }
        self.blocked = true;
    }
}

/// Resolves once shutdown is requested; never, if the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Filter / transform / publish stages over a change feed
pub struct NotificationPipeline {
    publisher: Arc<dyn Publisher>,
    config: PipelineConfig,
    counters: Arc<Counters>,
    /// Commits handled before this run started
    resume_from: u64,
    /// Changes to process before the live feed
    backlog: Vec<ChangeRecord>,
}

impl NotificationPipeline {
    /// Create a pipeline publishing to `publisher`
    pub fn new(publisher: Arc<dyn Publisher>, config: PipelineConfig) -> Self {
        NotificationPipeline {
            publisher,
            config,
            counters: Arc::new(Counters::default()),
            resume_from: 0,
            backlog: Vec::new(),
        }
    }

    /// Process `backlog` first, treating commits up to `resume_from` as handled
    pub fn with_backlog(mut self, resume_from: u64, backlog: Vec<ChangeRecord>) -> Self {
        self.resume_from = resume_from;
        self.backlog = backlog;
        self
    }

    /// Subscribe to `db`'s change feed and run the pipeline on a tokio task
    ///
    /// Must be called from within a tokio runtime. Without a checkpoint only
    /// commits made after this call are observed. With one, commits after
    /// the stored version are read back from the WAL and notified first.
    ///
    /// # Errors
    ///
    /// The checkpoint or the WAL could not be read.
    pub fn start(
        db: &Database,
        publisher: Arc<dyn Publisher>,
        config: PipelineConfig,
    ) -> Result<PipelineHandle> {
        // Subscribe before reading back, so no commit falls in between
        let feed = db.subscribe_changes();

        let (resume_from, backlog) = match &config.checkpoint {
            Some(checkpoint) => {
                let mut stored = checkpoint.load()?;
                if stored > db.current_version() {
                    warn!(
                        target: "evstore::pipeline",
                        path = %checkpoint.path().display(),
                        checkpoint = stored,
                        version = db.current_version(),
                        "Checkpoint is ahead of the store, notifying from the start"
                    );
                    stored = 0;
                }
                (stored, db.changes_since(stored)?)
            }
            None => (0, Vec::new()),
        };

        Ok(Self::new(publisher, config)
            .with_backlog(resume_from, backlog)
            .spawn(feed))
    }

    /// Current counters
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Run one change through the stages
    ///
    /// Returns the published notification, or `None` if the filter
    /// discarded the change.
    ///
    /// # Errors
    ///
    /// - `Corruption`: a Head-position row without a Head image
    /// - `NotificationDeliveryFailure`: a bounded backoff was spent
    pub async fn process(&self, change: &ChangeRecord) -> Result<Option<CommitNotification>> {
        let (_keep, mut never) = watch::channel(false);
        self.process_until(change, &mut never).await
    }

    async fn process_until(
        &self,
        change: &ChangeRecord,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<CommitNotification>> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if !filter::accepts(change) {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            trace!(
                target: "evstore::pipeline",
                stream_id = %change.key.stream_id,
                ordinal = change.key.ordinal.as_u64(),
                "Change filtered out"
            );
            return Ok(None);
        }

        let notification = match transform::project(change) {
            Ok(notification) => notification,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    target: "evstore::pipeline",
                    sequence = change.sequence,
                    error = %e,
                    "Undecodable head change"
                );
                return Err(e);
            }
        };

        self.deliver(&notification, shutdown).await?;
        Ok(Some(notification))
    }

    /// Publish with backoff until delivered, the backoff is spent, or shutdown
    async fn deliver(
        &self,
        notification: &CommitNotification,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut backoff = self.config.backoff.backoff();
        loop {
            let e = match self.publisher.publish(notification) {
                Ok(()) => {
                    self.counters.published.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target: "evstore::pipeline",
                        channel = %self.config.channel,
                        stream_id = %notification.stream_id,
                        revision = notification.stream_revision,
                        "Commit notification published"
                    );
                    return Ok(());
                }
                Err(e) => e,
            };

            let delay = match backoff.next_delay() {
                Some(delay) => delay,
                None => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        target: "evstore::pipeline",
                        channel = %self.config.channel,
                        stream_id = %notification.stream_id,
                        revision = notification.stream_revision,
                        attempts = backoff.retries() + 1,
                        error = %e,
                        "Delivery backoff spent"
                    );
                    return Err(into_delivery_failure(e));
                }
            };

            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "evstore::pipeline",
                channel = %self.config.channel,
                stream_id = %notification.stream_id,
                revision = notification.stream_revision,
                attempt = backoff.retries(),
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Publish failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(shutdown) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        target: "evstore::pipeline",
                        channel = %self.config.channel,
                        stream_id = %notification.stream_id,
                        revision = notification.stream_revision,
                        "Shutdown before delivery"
                    );
                    return Err(into_delivery_failure(e));
                }
            }
        }
    }

    /// Process one change, tracking commit progress
    ///
    /// Returns false when shutdown interrupted a delivery.
    async fn step(
        &self,
        change: &ChangeRecord,
        progress: &mut Progress,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        if !progress.begin(change.sequence) {
            trace!(
                target: "evstore::pipeline",
                sequence = change.sequence,
                "Change already handled"
            );
            return true;
        }
        match self.process_until(change, shutdown).await {
            Ok(_) => true,
            // Reading the change again will not make it decodable
            Err(Error::Corruption(_)) => true,
            Err(_) => {
                progress.block();
                !*shutdown.borrow()
            }
        }
    }

    /// Process the backlog, then consume `feed` until it closes or
    /// `shutdown` turns true
    ///
    /// On shutdown, changes already queued on the feed are still processed,
    /// unless a delivery is still failing. Dropping the shutdown sender
    /// detaches the pipeline: it then runs until the feed closes.
    pub async fn run(
        mut self,
        mut feed: mpsc::UnboundedReceiver<ChangeRecord>,
        mut shutdown: watch::Receiver<bool>,
    ) -> PipelineStats {
        let backlog = std::mem::take(&mut self.backlog);
        let mut progress = Progress::new(self.config.checkpoint.clone(), self.resume_from);
        info!(
            target: "evstore::pipeline",
            channel = %self.config.channel,
            resume_from = self.resume_from,
            backlog = backlog.len(),
            "Notification pipeline started"
        );

        let mut running = true;
        for change in &backlog {
            self.counters.replayed.fetch_add(1, Ordering::Relaxed);
            if !self.step(change, &mut progress, &mut shutdown).await {
                running = false;
                break;
            }
        }
        if running {
            // Live changes of commits already read back are skipped
            progress.finish();
        }

        let mut detached = false;
        while running {
            tokio::select! {
                biased;
                change = feed.recv() => match change {
                    Some(change) => running = self.step(&change, &mut progress, &mut shutdown).await,
                    None => {
                        info!(target: "evstore::pipeline", "Change feed closed");
                        break;
                    }
                },
                changed = shutdown.changed(), if !detached => match changed {
                    Ok(()) if *shutdown.borrow() => {
                        while let Ok(change) = feed.try_recv() {
                            if !self.step(&change, &mut progress, &mut shutdown).await {
                                running = false;
                                break;
                            }
                        }
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => detached = true,
                },
            }
        }
        // A delivery cut short by shutdown leaves its commit unfinished
        if running {
            progress.finish();
        }

        let stats = self.stats();
        info!(
            target: "evstore::pipeline",
            channel = %self.config.channel,
            received = stats.received,
            replayed = stats.replayed,
            published = stats.published,
            failed = stats.failed,
            checkpoint = progress.finished,
            "Notification pipeline stopped"
        );
        stats
    }

    /// Run on a new tokio task
    pub fn spawn(self, feed: mpsc::UnboundedReceiver<ChangeRecord>) -> PipelineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::clone(&self.counters);
        let task = tokio::spawn(self.run(feed, shutdown_rx));
        PipelineHandle {
            shutdown: shutdown_tx,
            task,
            counters,
        }
    }
}

fn into_delivery_failure(e: Error) -> Error {
    match e {
        Error::NotificationDeliveryFailure(_) => e,
        other => Error::NotificationDeliveryFailure(other.to_string()),
    }
}

/// Handle to a running pipeline task
///
/// Dropping the handle leaves the task running until the feed closes.
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<PipelineStats>,
    counters: Arc<Counters>,
}

impl PipelineHandle {
    /// Current counters
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// True once the task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop after draining queued changes, returning final counters
    ///
    /// A delivery still being retried is abandoned; with a checkpoint its
    /// commit is notified again on the next start.
    pub async fn shutdown(self) -> Result<PipelineStats> {
        // The task may already have exited because the feed closed
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| Error::NotificationDeliveryFailure(format!("pipeline task failed: {}", e)))
    }
}
