//! Consolidation of every stable output into one ZIP archive.
//!
//! Entries are added in file-name order under their bare file name. An output
//! that vanishes or cannot be read between listing and reading is skipped and
//! reported; anything that stops the container itself from being written is
//! fatal and leaves the outputs untouched.

use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use reportharvest_shared::{HarvestError, Result};
use reportharvest_storage::OutputStore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// One file written into the archive.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// An output left out of the archive.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

/// Result of one consolidation.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub entries: Vec<ArchiveEntry>,
    pub skipped: Vec<SkippedEntry>,
}

/// Removes the partial archive unless disarmed.
struct PartialArchive {
    path: PathBuf,
    armed: bool,
}

impl Drop for PartialArchive {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to remove partial archive");
                }
            }
        }
    }
}

/// Write every output in `store` into a Deflate-compressed ZIP at `dest`.
///
/// The archive is built under a hidden temp name next to `dest` and renamed
/// into place once finalized, replacing any previous archive.
#[instrument(skip_all, fields(source = %store.root().display(), dest = %dest.display()))]
pub fn consolidate(store: &OutputStore, dest: &Path) -> Result<ArchiveSummary> {
    let outputs = store.list_outputs()?;
    info!(outputs = outputs.len(), "consolidating outputs");

    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| HarvestError::io(&parent, e))?;

    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HarvestError::Archive(format!("invalid archive path '{}'", dest.display())))?;
    let temp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::now_v7()));

    let file = File::create(&temp).map_err(|e| HarvestError::io(&temp, e))?;
    let mut guard = PartialArchive {
        path: temp,
        armed: true,
    };

    let mut zip = ZipWriter::new(file);
    let (entries, skipped) = write_entries(&mut zip, &outputs)?;

    let file = zip
        .finish()
        .map_err(|e| HarvestError::Archive(format!("failed to finalize archive: {e}")))?;
    file.sync_all().map_err(|e| HarvestError::io(&guard.path, e))?;
    drop(file);

    std::fs::rename(&guard.path, dest).map_err(|e| HarvestError::io(dest, e))?;
    guard.armed = false;

    info!(
        entries = entries.len(),
        skipped = skipped.len(),
        "archive written"
    );

    Ok(ArchiveSummary {
        path: dest.to_path_buf(),
        entries,
        skipped,
    })
}

/// Add each listed file to `zip` under its bare file name.
///
/// A file that can no longer be read is skipped; a failure of the container
/// itself is returned.
fn write_entries<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    paths: &[PathBuf],
) -> Result<(Vec<ArchiveEntry>, Vec<SkippedEntry>)> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::with_capacity(paths.len());
    let mut skipped = Vec::new();

    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Read fully first so a failed read never leaves a half-written entry.
        let content = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %name, error = %e, "skipping unreadable output");
                skipped.push(SkippedEntry {
                    name,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        zip.start_file(name.as_str(), options)
            .map_err(|e| HarvestError::Archive(format!("failed to add '{name}': {e}")))?;
        zip.write_all(&content)
            .map_err(|e| HarvestError::Archive(format!("failed to write '{name}': {e}")))?;

        let sha256 = format!("{:x}", Sha256::digest(&content));
        debug!(file = %name, size = content.len(), "archived");
        entries.push(ArchiveEntry {
            name,
            size_bytes: content.len() as u64,
            sha256,
        });
    }

    Ok((entries, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rh-archive-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn read_archive(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut body = Vec::new();
                entry.read_to_end(&mut body).unwrap();
                (entry.name().to_string(), body)
            })
            .collect()
    }

    #[test]
    fn archives_every_output_byte_for_byte() {
        let tmp = temp_dir();
        let store = OutputStore::open(tmp.join("out")).unwrap();
        std::fs::write(tmp.join("out/2023002.csv"), "b,c\r\n").unwrap();
        std::fs::write(tmp.join("out/2023001.csv"), "\u{feff}a\r\n").unwrap();
        std::fs::write(tmp.join("out/.2023003.0190.tmp"), "partial").unwrap();

        let dest = tmp.join("dist/all.zip");
        let summary = consolidate(&store, &dest).unwrap();

        assert_eq!(summary.path, dest);
        assert_eq!(summary.entries.len(), 2);
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.entries[0].name, "2023001.csv");
        assert_eq!(summary.entries[1].size_bytes, 5);
        assert_eq!(
            summary.entries[1].sha256,
            format!("{:x}", Sha256::digest(b"b,c\r\n"))
        );

        let contents = read_archive(&dest);
        assert_eq!(
            contents,
            vec![
                ("2023001.csv".to_string(), "\u{feff}a\r\n".as_bytes().to_vec()),
                ("2023002.csv".to_string(), b"b,c\r\n".to_vec()),
            ]
        );

        let leftovers: Vec<_> = std::fs::read_dir(tmp.join("dist"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["all.zip"]);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn empty_store_gives_empty_archive() {
        let tmp = temp_dir();
        let store = OutputStore::open(tmp.join("out")).unwrap();
        let dest = tmp.join("all.zip");

        let summary = consolidate(&store, &dest).unwrap();
        assert!(summary.entries.is_empty());
        assert!(read_archive(&dest).is_empty());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn replaces_previous_archive() {
        let tmp = temp_dir();
        let store = OutputStore::open(tmp.join("out")).unwrap();
        let dest = tmp.join("all.zip");
        std::fs::write(&dest, b"stale").unwrap();
        std::fs::write(tmp.join("out/1.csv"), b"x").unwrap();

        consolidate(&store, &dest).unwrap();
        assert_eq!(read_archive(&dest).len(), 1);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn output_vanishing_after_listing_is_skipped() {
        let tmp = temp_dir();
        let store = OutputStore::open(tmp.join("out")).unwrap();
        std::fs::write(tmp.join("out/1.csv"), b"one\r\n").unwrap();
        std::fs::write(tmp.join("out/2.csv"), b"two\r\n").unwrap();
        std::fs::write(tmp.join("out/3.csv"), b"three\r\n").unwrap();

        let listed = store.list_outputs().unwrap();
        std::fs::remove_file(tmp.join("out/2.csv")).unwrap();

        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let (entries, skipped) = write_entries(&mut zip, &listed).unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["1.csv", "3.csv"]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name, "2.csv");
        assert!(!skipped[0].reason.is_empty());

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut body = Vec::new();
        archive.by_name("3.csv").unwrap().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"three\r\n");
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn partial_archive_guard_removes_its_file() {
        let tmp = temp_dir();
        let path = tmp.join(".all.zip.0190.tmp");
        std::fs::write(&path, b"partial").unwrap();

        drop(PartialArchive {
            path: path.clone(),
            armed: true,
        });
        assert!(!path.exists());

        // Already gone is not an error.
        drop(PartialArchive { path, armed: true });
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn unwritable_destination_is_fatal_and_keeps_outputs() {
        let tmp = temp_dir();
        let store = OutputStore::open(tmp.join("out")).unwrap();
        std::fs::write(tmp.join("out/1.csv"), b"x").unwrap();
        // A regular file where the archive's parent directory should be.
        std::fs::write(tmp.join("blocked"), b"").unwrap();

        let err = consolidate(&store, &tmp.join("blocked/all.zip")).unwrap_err();
        assert!(matches!(err, HarvestError::Io { .. }));
        assert_eq!(std::fs::read(tmp.join("out/1.csv")).unwrap(), b"x");
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
