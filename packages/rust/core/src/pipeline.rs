//! Orchestration: initial pass, retry pass, archive.
//!
//! A pass submits every pending item through the [`ConcurrencyGate`] and
//! reports outcomes in finish order. The retry pass reruns the same logic over
//! whatever is still missing from the output store afterwards.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use reportharvest_archive::ArchiveSummary;
use reportharvest_fetcher::{ArtifactSource, TwoPhaseFetcher};
use reportharvest_shared::{
    HarvestError, HarvestSettings, ItemOutcome, PassKind, PassSummary, Result, RunProgress,
    WorkItem,
};
use reportharvest_storage::OutputStore;

use crate::gate::ConcurrencyGate;
use crate::item::process_item;
use crate::{input, resume};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting harvest status.
pub trait ProgressReporter: Send + Sync {
    /// Called before a pass admits its first item.
    fn pass_started(&self, kind: PassKind, total: usize);
    /// Called as each item reaches a terminal outcome, in finish order.
    fn item_finished(&self, item: &WorkItem, outcome: &ItemOutcome, progress: &RunProgress);
    /// Called once every admitted item of a pass has finished.
    fn pass_finished(&self, summary: &PassSummary);
    /// Called before archive consolidation starts.
    fn archive_started(&self, dest: &Path);
    /// Called once the archive has been written.
    fn archive_finished(&self, summary: &ArchiveSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn pass_started(&self, _kind: PassKind, _total: usize) {}
    fn item_finished(&self, _item: &WorkItem, _outcome: &ItemOutcome, _progress: &RunProgress) {}
    fn pass_finished(&self, _summary: &PassSummary) {}
    fn archive_started(&self, _dest: &Path) {}
    fn archive_finished(&self, _summary: &ArchiveSummary) {}
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// An item that ended a pass without an output.
#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub item: WorkItem,
    pub permanent: bool,
    pub reason: String,
}

/// Summary of one pass plus the items it failed.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    #[serde(flatten)]
    pub summary: PassSummary,
    pub failures: Vec<FailedItem>,
}

/// Outcome of both passes over a work list.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Distinct identifiers in the work list.
    pub total: usize,
    /// Identifiers that already had an output before the run.
    pub already_done: usize,
    /// Identifiers submitted to the initial pass.
    pub pending: usize,
    pub initial: PassReport,
    /// Absent when nothing was left to retry or the run was cancelled.
    pub retry: Option<PassReport>,
    /// Identifiers still without an output at the end of the run.
    pub missing: Vec<WorkItem>,
    pub cancelled: bool,
}

/// Full report of a `harvest` run.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub run: RunReport,
    /// Absent when the run was cancelled or consolidation failed.
    pub archive: Option<ArchiveSummary>,
    /// Why consolidation failed. The passes' results stand regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Harvester
// ---------------------------------------------------------------------------

/// Drives item pipelines for one artifact source against one output store.
pub struct Harvester<S> {
    source: Arc<S>,
    store: OutputStore,
    gate: ConcurrencyGate,
}

impl<S> Harvester<S>
where
    S: ArtifactSource + 'static,
{
    pub fn new(source: S, store: OutputStore, gate: ConcurrencyGate) -> Self {
        Self {
            source: Arc::new(source),
            store,
            gate,
        }
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Run the initial pass over every pending item, then one retry pass over
    /// whatever is still missing.
    #[instrument(skip_all, fields(items = items.len(), width = self.gate.width()))]
    pub async fn run(
        &self,
        items: &[WorkItem],
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let before = resume::snapshot(items, &self.store)?;
        info!(
            total = before.total,
            already_done = before.already_done,
            pending = before.pending.len(),
            "starting harvest"
        );
        let pending = before.pending.len();

        let initial = self.run_pass(PassKind::Initial, before.pending, progress, cancel).await?;

        let mut retry = None;
        if initial.summary.cancelled {
            warn!("cancelled, skipping retry pass");
        } else {
            let after = resume::snapshot(items, &self.store)?;
            if after.pending.is_empty() {
                info!("nothing left to retry");
            } else {
                info!(pending = after.pending.len(), "starting retry pass");
                retry = Some(self.run_pass(PassKind::Retry, after.pending, progress, cancel).await?);
            }
        }

        let missing = resume::snapshot(items, &self.store)?.pending;
        let cancelled =
            initial.summary.cancelled || retry.as_ref().is_some_and(|r| r.summary.cancelled);

        info!(
            total = before.total,
            missing = missing.len(),
            cancelled,
            "harvest passes complete"
        );

        Ok(RunReport {
            total: before.total,
            already_done: before.already_done,
            pending,
            initial,
            retry,
            missing,
            cancelled,
        })
    }

    /// Process `items` with at most `width` pipelines in flight.
    ///
    /// Cancellation stops admission; items already admitted run to completion.
    #[instrument(skip_all, fields(pass = %kind, total = items.len()))]
    pub async fn run_pass(
        &self,
        kind: PassKind,
        items: Vec<WorkItem>,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PassReport> {
        let started = Instant::now();
        let total = items.len();
        progress.pass_started(kind, total);

        let mut tally = Tally::default();
        let mut tasks: JoinSet<(WorkItem, ItemOutcome)> = JoinSet::new();
        let mut cancelled = false;

        for item in items {
            while let Some(joined) = tasks.try_join_next() {
                tally.settle(joined, progress);
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = self.gate.acquire() => permit?,
            };

            tally.progress.submitted += 1;
            let source = Arc::clone(&self.source);
            let store = self.store.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(process_item(source.as_ref(), &store, &item))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        ItemOutcome::TransientFailure(format!(
                            "unexpected fault: {}",
                            panic_message(panic.as_ref())
                        ))
                    });
                (item, outcome)
            });
        }

        if cancelled {
            warn!(
                admitted = tally.progress.submitted,
                remaining = total - tally.progress.submitted,
                "cancelled, waiting for in-flight items"
            );
        }

        while let Some(joined) = tasks.join_next().await {
            tally.settle(joined, progress);
        }

        let summary = PassSummary {
            kind,
            total,
            progress: tally.progress,
            elapsed: started.elapsed(),
            cancelled,
        };

        info!(
            pass = %kind,
            submitted = summary.progress.submitted,
            succeeded = summary.progress.succeeded,
            failed_transient = summary.progress.failed_transient,
            failed_permanent = summary.progress.failed_permanent,
            skipped = summary.progress.skipped,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "pass complete"
        );
        progress.pass_finished(&summary);

        Ok(PassReport {
            summary,
            failures: tally.failures,
        })
    }
}

/// Counters and failures accumulated while a pass drains.
#[derive(Default)]
struct Tally {
    progress: RunProgress,
    failures: Vec<FailedItem>,
}

impl Tally {
    fn settle(
        &mut self,
        joined: std::result::Result<(WorkItem, ItemOutcome), JoinError>,
        progress: &dyn ProgressReporter,
    ) {
        let (item, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                // Item tasks catch their own panics and are never aborted.
                error!(error = %e, "item task lost");
                self.progress.failed_transient += 1;
                return;
            }
        };

        self.progress.record(&outcome);
        match &outcome {
            ItemOutcome::TransientFailure(reason) | ItemOutcome::PermanentFailure(reason) => {
                let permanent = matches!(outcome, ItemOutcome::PermanentFailure(_));
                warn!(item = %item, permanent, reason = %reason, "item failed");
                self.failures.push(FailedItem {
                    item: item.clone(),
                    permanent,
                    reason: reason.clone(),
                });
            }
            ItemOutcome::Success | ItemOutcome::AlreadyDone => {}
        }
        progress.item_finished(&item, &outcome, &self.progress);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "panic"
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run the full batch: load the work list, run both passes over the HTTP
/// fetcher, then consolidate every output into the archive.
///
/// A cancelled run skips the archive. A failed archive is recorded in the
/// report rather than discarding the passes' results.
#[instrument(skip_all, fields(ids = %settings.ids_path.display(), workers = settings.workers))]
pub async fn harvest(
    settings: &HarvestSettings,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<HarvestReport> {
    let started_at = Utc::now();

    let items = input::load_work_items(&settings.ids_path)?;
    let store = OutputStore::open(&settings.output_dir)?;
    let gate = ConcurrencyGate::new(settings.workers)?;
    let harvester = Harvester::new(TwoPhaseFetcher::new(settings)?, store, gate);

    let run = harvester.run(&items, progress, cancel).await?;

    let (archive, archive_error) = if run.cancelled {
        warn!("cancelled, skipping archive consolidation");
        (None, None)
    } else {
        if !run.missing.is_empty() {
            warn!(missing = run.missing.len(), "consolidating with items still missing");
        }
        match pack(harvester.store(), &settings.archive_path, progress).await {
            Ok(summary) => (Some(summary), None),
            Err(e) => {
                error!(error = %e, "archive consolidation failed");
                (None, Some(e.to_string()))
            }
        }
    };

    Ok(HarvestReport {
        started_at,
        finished_at: Utc::now(),
        run,
        archive,
        archive_error,
    })
}

/// Consolidate every output in `store` into the archive at `dest`.
pub async fn pack(
    store: &OutputStore,
    dest: &Path,
    progress: &dyn ProgressReporter,
) -> Result<ArchiveSummary> {
    progress.archive_started(dest);

    let store = store.clone();
    let dest = dest.to_path_buf();
    let summary = tokio::task::spawn_blocking(move || {
        reportharvest_archive::consolidate(&store, &dest)
    })
    .await
    .map_err(|e| HarvestError::Archive(format!("archive task failed: {e}")))??;

    progress.archive_finished(&summary);
    Ok(summary)
}

/// Run a single item through the pipeline against the configured server.
#[instrument(skip_all, fields(item = %item))]
pub async fn fetch_one(settings: &HarvestSettings, item: &WorkItem) -> Result<ItemOutcome> {
    let store = OutputStore::open(&settings.output_dir)?;
    let fetcher = TwoPhaseFetcher::new(settings)?;
    Ok(process_item(&fetcher, &store, item).await)
}
