//! The per-item pipeline: fetch, transcode, write.

use reportharvest_fetcher::ArtifactSource;
use reportharvest_shared::{HarvestError, ItemOutcome, ItemStage, WorkItem};
use reportharvest_storage::OutputStore;
use tracing::{debug, instrument};

/// Drive one work item to a terminal outcome.
///
/// Never fails: every fault is folded into the returned outcome. An item whose
/// output already exists is short-circuited without touching the source.
#[instrument(skip_all, fields(item = %item))]
pub async fn process_item<S>(source: &S, store: &OutputStore, item: &WorkItem) -> ItemOutcome
where
    S: ArtifactSource,
{
    if store.contains(item) {
        debug!("output already present");
        return ItemOutcome::AlreadyDone;
    }

    debug!(stage = %ItemStage::Fetching, "stage");
    let bytes = match source.fetch(item).await {
        Ok(bytes) => bytes,
        Err(failure) if failure.is_permanent() => {
            return ItemOutcome::PermanentFailure(failure.to_string());
        }
        Err(failure) => return ItemOutcome::TransientFailure(failure.to_string()),
    };

    let store = store.clone();
    let owned = item.clone();
    let written = tokio::task::spawn_blocking(move || {
        debug!(item = %owned, stage = %ItemStage::Transcoding, "stage");
        let rows = reportharvest_transcode::decode_first_sheet(&bytes)?;

        debug!(item = %owned, stage = %ItemStage::Writing, rows = rows.len(), "stage");
        store.write_atomic(&owned, |w| {
            reportharvest_transcode::encode_csv(&rows, w)?;
            Ok(())
        })
    })
    .await;

    match written {
        Ok(Ok(path)) => {
            debug!(path = %path.display(), "item complete");
            ItemOutcome::Success
        }
        Ok(Err(e)) => classify(e),
        Err(join) => ItemOutcome::TransientFailure(format!(
            "unexpected fault while transcoding: {join}"
        )),
    }
}

fn classify(e: HarvestError) -> ItemOutcome {
    if e.is_permanent() {
        ItemOutcome::PermanentFailure(e.to_string())
    } else {
        ItemOutcome::TransientFailure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reportharvest_fetcher::{FetchFailure, Phase};
    use reportharvest_transcode::fixtures::workbook;

    /// Returns one fixed response and counts calls.
    struct Fixed {
        response: fn() -> Result<Vec<u8>, FetchFailure>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(response: fn() -> Result<Vec<u8>, FetchFailure>) -> Self {
            Self {
                response,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ArtifactSource for Fixed {
        async fn fetch(&self, _item: &WorkItem) -> Result<Vec<u8>, FetchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.response)()
        }
    }

    fn grades() -> Result<Vec<u8>, FetchFailure> {
        Ok(workbook(
            r#"<row r="1"><c r="A1" t="inlineStr"><is><t>Course</t></is></c><c r="B1"><v>90</v></c></row>"#,
        ))
    }

    fn temp_store() -> (PathBuf, OutputStore) {
        let dir = std::env::temp_dir().join(format!("rh-item-test-{}", uuid::Uuid::now_v7()));
        let store = OutputStore::open(&dir).unwrap();
        (dir, store)
    }

    fn item(id: &str) -> WorkItem {
        WorkItem::new(id).unwrap()
    }

    #[tokio::test]
    async fn writes_csv_on_success() {
        let (dir, store) = temp_store();
        let source = Fixed::new(grades);

        let outcome = process_item(&source, &store, &item("2023001")).await;
        assert_eq!(outcome, ItemOutcome::Success);

        let written = std::fs::read(dir.join("2023001.csv")).unwrap();
        assert_eq!(written, b"\xEF\xBB\xBFCourse,90\r\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn existing_output_short_circuits() {
        let (dir, store) = temp_store();
        std::fs::write(dir.join("2023002.csv"), b"done").unwrap();
        let source = Fixed::new(grades);

        let outcome = process_item(&source, &store, &item("2023002")).await;
        assert_eq!(outcome, ItemOutcome::AlreadyDone);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(dir.join("2023002.csv")).unwrap(), b"done");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn undecodable_payload_is_permanent_and_writes_nothing() {
        let (dir, store) = temp_store();
        let source = Fixed::new(|| Ok(b"<html>login</html>".to_vec()));

        let outcome = process_item(&source, &store, &item("2023003")).await;
        assert!(matches!(outcome, ItemOutcome::PermanentFailure(_)));
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn fetch_failures_keep_their_class() {
        let (dir, store) = temp_store();

        let missing = Fixed::new(|| Err(FetchFailure::MissingHandle { token: "cachedId" }));
        assert!(matches!(
            process_item(&missing, &store, &item("a")).await,
            ItemOutcome::PermanentFailure(_)
        ));

        let exhausted = Fixed::new(|| {
            Err(FetchFailure::Exhausted {
                phase: Phase::Artifact,
                attempts: 6,
                last: "HTTP 503".into(),
            })
        });
        let outcome = process_item(&exhausted, &store, &item("b")).await;
        assert!(matches!(outcome, ItemOutcome::TransientFailure(_)));
        assert!(outcome.reason().unwrap().contains("6 attempts"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
