//! Core domain types for a harvest run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

/// An opaque, stable external identifier for one unit of batch work.
///
/// The identifier doubles as the file stem of its output, so it must be a
/// single, non-hidden path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkItem(String);

impl WorkItem {
    /// Validate and wrap an identifier.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(HarvestError::validation("identifier is empty"));
        }
        if id.starts_with('.') {
            return Err(HarvestError::validation(format!(
                "identifier '{id}' must not start with '.'"
            )));
        }
        if id.contains(['/', '\\', '\0']) {
            return Err(HarvestError::validation(format!(
                "identifier '{}' contains a path separator",
                id.escape_debug()
            )));
        }
        Ok(Self(id))
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for WorkItem {
    type Err = HarvestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WorkItem {
    type Error = HarvestError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkItem> for String {
    fn from(item: WorkItem) -> Self {
        item.0
    }
}

// ---------------------------------------------------------------------------
// Outcomes & stages
// ---------------------------------------------------------------------------

/// Terminal result of one item pipeline within one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Fetched, transcoded and written.
    Success,
    /// Output already present when the pipeline started; no network access.
    AlreadyDone,
    /// Likely to succeed later (exhausted retries, unexpected fault).
    TransientFailure(String),
    /// Will not succeed without an upstream change.
    PermanentFailure(String),
}

impl ItemOutcome {
    /// Whether the item has a stable output after this outcome.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Success | Self::AlreadyDone)
    }

    /// Failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::TransientFailure(r) | Self::PermanentFailure(r) => Some(r),
            Self::Success | Self::AlreadyDone => None,
        }
    }
}

/// Where an item pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStage {
    Pending,
    Submitted,
    Fetching,
    Transcoding,
    Writing,
}

impl std::fmt::Display for ItemStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Fetching => "fetching",
            Self::Transcoding => "transcoding",
            Self::Writing => "writing",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Which orchestration pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Initial,
    Retry,
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => f.write_str("initial"),
            Self::Retry => f.write_str("retry"),
        }
    }
}

/// Counters for a single pass. A fresh value is created for every pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    /// Items handed to an item pipeline.
    pub submitted: usize,
    /// Items written during this pass.
    pub succeeded: usize,
    /// Items that ended in a transient failure.
    pub failed_transient: usize,
    /// Items that ended in a permanent failure.
    pub failed_permanent: usize,
    /// Items short-circuited because their output already existed.
    pub skipped: usize,
}

impl RunProgress {
    /// Fold one finished item into the counters.
    pub fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Success => self.succeeded += 1,
            ItemOutcome::AlreadyDone => self.skipped += 1,
            ItemOutcome::TransientFailure(_) => self.failed_transient += 1,
            ItemOutcome::PermanentFailure(_) => self.failed_permanent += 1,
        }
    }

    /// Total failures of either kind.
    pub fn failed(&self) -> usize {
        self.failed_transient + self.failed_permanent
    }

    /// Items that reached a terminal state.
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed() + self.skipped
    }
}

/// Summary of one completed (or cancelled) pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub kind: PassKind,
    /// Items the pass was asked to process.
    pub total: usize,
    pub progress: RunProgress,
    pub elapsed: Duration,
    /// Whether admission stopped early because of cancellation.
    pub cancelled: bool,
}
