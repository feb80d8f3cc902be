//! Destination store for per-item outputs.
//!
//! The [`OutputStore`] owns one directory holding a `{key}.csv` file for every
//! completed work item. Files only ever appear there through
//! [`OutputStore::write_atomic`], so an existing file is always complete.
//!
//! Hidden files (leading `.`) are reserved for in-progress temp files and are
//! never reported as outputs.

mod atomic;

use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use reportharvest_shared::{HarvestError, Result, WorkItem};
use tracing::{debug, instrument};

/// Extension of every stable output.
pub const OUTPUT_EXTENSION: &str = "csv";

/// Handle to the destination directory.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    /// Open the store at `root`, creating the directory if needed.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| HarvestError::io(&root, e))?;
        debug!("output store ready");
        Ok(Self { root })
    }

    /// The destination directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the output for `item` lives once complete.
    pub fn final_path(&self, item: &WorkItem) -> PathBuf {
        self.root
            .join(format!("{}.{OUTPUT_EXTENSION}", item.as_str()))
    }

    /// Whether `item` already has a stable output.
    pub fn contains(&self, item: &WorkItem) -> bool {
        self.final_path(item).is_file()
    }

    /// Keys of every stable output currently present.
    pub fn completed(&self) -> Result<HashSet<String>> {
        Ok(self
            .scan()?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Paths of every stable output, sorted by file name.
    pub fn list_outputs(&self) -> Result<Vec<PathBuf>> {
        let mut outputs = self.scan()?;
        outputs.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(outputs.into_iter().map(|(_, path)| path).collect())
    }

    /// Write the output for `item` through a temp file and rename it into place.
    ///
    /// `write` receives a buffered writer over the temp file. If it fails or
    /// panics, or the file cannot be synced or renamed, the temp file is
    /// removed and the final path is left as it was.
    pub fn write_atomic<F>(&self, item: &WorkItem, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&mut BufWriter<File>) -> Result<()>,
    {
        atomic::write_atomic(&self.root, item.as_str(), &self.final_path(item), write)
    }

    fn scan(&self) -> Result<Vec<(String, PathBuf)>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| HarvestError::io(&self.root, e))?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HarvestError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Some(key) = name.strip_suffix(&format!(".{OUTPUT_EXTENSION}")) else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            found.push((key.to_string(), path));
        }
        Ok(found)
    }
}
