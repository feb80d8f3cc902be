//! Work-list loading.

use std::path::Path;

use reportharvest_shared::{HarvestError, Result, WorkItem};
use tracing::{info, instrument, warn};

/// Read newline-delimited identifiers from `path`.
///
/// An unreadable file is fatal for the run. Individual lines that do not form
/// a valid identifier are logged and skipped.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_work_items(path: &Path) -> Result<Vec<WorkItem>> {
    let text = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
    let items = parse_work_items(&text);
    info!(count = items.len(), "work list loaded");
    Ok(items)
}

/// Parse identifiers, one per line. Blank lines are ignored, surrounding
/// whitespace is trimmed, and duplicates are kept.
pub fn parse_work_items(text: &str) -> Vec<WorkItem> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    text.lines()
        .enumerate()
        .filter_map(|(n, line)| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            match WorkItem::new(line) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(line = n + 1, error = %e, "skipping invalid identifier");
                    None
                }
            }
        })
        .collect()
}
