//! Per-item fetch failures, classified as permanent or transient.

/// Which network round-trip of the protocol failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Form POST that yields the render handles.
    Handles,
    /// GET that yields the spreadsheet bytes.
    Artifact,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handles => f.write_str("handle request"),
            Self::Artifact => f.write_str("artifact request"),
        }
    }
}

/// Why fetching one item's artifact failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    /// The report page lacks a render handle; upstream has no data for the item.
    #[error("report page is missing the {token} handle")]
    MissingHandle { token: &'static str },

    /// A non-success status outside the retryable set.
    #[error("{phase} returned HTTP {status}")]
    Status { phase: Phase, status: u16 },

    /// Every attempt hit a connection fault or a retryable status.
    #[error("{phase} gave up after {attempts} attempts: {last}")]
    Exhausted {
        phase: Phase,
        attempts: u32,
        last: String,
    },

    /// Anything the retry loop does not know how to classify.
    #[error("{phase} failed unexpectedly: {message}")]
    Unexpected { phase: Phase, message: String },
}

impl FetchFailure {
    /// Permanent failures are never retried within a pass.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::MissingHandle { .. } | Self::Status { .. })
    }
}
