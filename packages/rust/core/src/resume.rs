//! Resume tracking: which work items still lack a stable output.

use std::collections::HashSet;

use reportharvest_shared::{Result, WorkItem};
use reportharvest_storage::OutputStore;
use serde::Serialize;
use tracing::debug;

/// Completion state of a work list against the output store.
#[derive(Debug, Clone, Serialize)]
pub struct ResumeSnapshot {
    /// Distinct identifiers in the work list.
    pub total: usize,
    /// Distinct identifiers that already have an output.
    pub already_done: usize,
    /// Identifiers without an output, in first-seen order, without duplicates.
    pub pending: Vec<WorkItem>,
}

/// Compare `items` with the outputs currently in `store`.
///
/// Existence of `{key}.csv` is the only completion signal.
pub fn snapshot(items: &[WorkItem], store: &OutputStore) -> Result<ResumeSnapshot> {
    let completed = store.completed()?;

    let mut seen = HashSet::with_capacity(items.len());
    let mut already_done = 0;
    let mut pending = Vec::new();

    for item in items {
        if !seen.insert(item.as_str()) {
            continue;
        }
        if completed.contains(item.as_str()) {
            already_done += 1;
        } else {
            pending.push(item.clone());
        }
    }

    debug!(total = seen.len(), already_done, pending = pending.len(), "resume snapshot");
    Ok(ResumeSnapshot {
        total: seen.len(),
        already_done,
        pending,
    })
}
