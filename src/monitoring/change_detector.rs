use crate::models::ListingRecord;
use crate::storage::{ListingStore, PersistenceError};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ChangeDetectorError {
    /// None of `unrecorded` is durably marked as seen; they will come back
    /// as new on the next call.
    #[error("failed to persist {failed} of {attempted} seen listings")]
    Persist {
        attempted: usize,
        failed: usize,
        unrecorded: Vec<ListingRecord>,
        #[source]
        source: PersistenceError,
    },
}

/// Tracks which listings were already reported, locally and in the store
pub struct ChangeDetector {
    store: Arc<dyn ListingStore>,
    preload_existing: bool,
    seen: Mutex<HashSet<String>>,
    loaded: OnceCell<()>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn ListingStore>, preload_existing: bool) -> Self {
        Self {
            store,
            preload_existing,
            seen: Mutex::new(HashSet::new()),
            loaded: OnceCell::new(),
        }
    }

    /// Keep the records whose ids were not seen before, in input order,
    /// and persist them as seen.
    ///
    /// If any write fails, every id of this batch is forgotten again.
    pub async fn filter_new(&self, records: Vec<ListingRecord>) -> Result<Vec<ListingRecord>, ChangeDetectorError> {
        self.ensure_loaded().await;

        let fresh: Vec<ListingRecord> = {
            let mut seen = self.seen.lock().await;
            records
                .into_iter()
                .filter(|record| seen.insert(record.external_id.clone()))
                .collect()
        };

        if fresh.is_empty() {
            return Ok(fresh);
        }

        let seen_at = Utc::now();
        let results = join_all(
            fresh
                .iter()
                .map(|record| self.store.record_seen(&record.external_id, seen_at)),
        )
        .await;

        let mut failures = results.into_iter().filter_map(Result::err);
        if let Some(source) = failures.next() {
            let failed = 1 + failures.count();
            {
                let mut seen = self.seen.lock().await;
                for record in &fresh {
                    seen.remove(&record.external_id);
                }
            }
            warn!(
                "Rolled back {} seen listings after {} persistence failures: {}",
                fresh.len(),
                failed,
                source
            );
            return Err(ChangeDetectorError::Persist {
                attempted: fresh.len(),
                failed,
                unrecorded: fresh,
                source,
            });
        }

        debug!("Recorded {} new listings as seen", fresh.len());
        Ok(fresh)
    }

    pub async fn seen_count(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_seen(&self, external_id: &str) -> bool {
        self.seen.lock().await.contains(external_id)
    }

    /// Forget the local seen set; the store keeps its own copy.
    pub async fn close(&self) {
        let mut seen = self.seen.lock().await;
        info!("Change detector closed with {} seen listings", seen.len());
        seen.clear();
    }

    async fn ensure_loaded(&self) {
        if !self.preload_existing {
            return;
        }
        self.loaded
            .get_or_init(|| async {
                match self.store.fetch_seen_ids().await {
                    Ok(ids) => {
                        let mut seen = self.seen.lock().await;
                        seen.extend(ids);
                        info!("Preloaded {} seen listings", seen.len());
                    }
                    Err(e) => warn!("Unable to preload seen listings: {}", e),
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingDraft;
    use crate::testing::MemoryStore;
    use std::sync::atomic::Ordering;

    fn listing(id: &str) -> ListingRecord {
        ListingDraft {
            external_id: id.to_string(),
            title: format!("Wohnung {}", id),
            price_eur: 1000,
            detail_url: format!("https://www.immobilienscout24.de/expose/{}", id),
            ..ListingDraft::default()
        }
        .validate()
        .unwrap()
    }

    fn ids(records: &[ListingRecord]) -> Vec<&str> {
        records.iter().map(|r| r.external_id.as_str()).collect()
    }

    fn detector(store: &Arc<MemoryStore>) -> ChangeDetector {
        ChangeDetector::new(store.clone(), true)
    }

    #[tokio::test]
    async fn duplicates_within_one_batch_are_dropped() {
        let store = Arc::new(MemoryStore::default());
        let detector = detector(&store);

        let fresh = detector
            .filter_new(vec![listing("A"), listing("B"), listing("A")])
            .await
            .unwrap();
        assert_eq!(ids(&fresh), vec!["A", "B"]);
        assert_eq!(store.recorded_ids().len(), 2);
    }

    #[tokio::test]
    async fn second_sighting_is_not_new() {
        let store = Arc::new(MemoryStore::default());
        let detector = detector(&store);

        assert_eq!(ids(&detector.filter_new(vec![listing("A")]).await.unwrap()), vec!["A"]);
        assert!(detector.filter_new(vec![listing("A")]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_rolls_back_whole_batch() {
        let store = Arc::new(MemoryStore::default());
        store.fail_on("B");
        let detector = detector(&store);

        let err = detector
            .filter_new(vec![listing("A"), listing("B")])
            .await
            .unwrap_err();
        let ChangeDetectorError::Persist {
            attempted,
            failed,
            unrecorded,
            ..
        } = err;
        assert_eq!((attempted, failed), (2, 1));
        assert_eq!(ids(&unrecorded), vec!["A", "B"]);

        assert!(!detector.is_seen("A").await);
        assert!(!detector.is_seen("B").await);

        store.recover();
        let fresh = detector.filter_new(vec![listing("A")]).await.unwrap();
        assert_eq!(ids(&fresh), vec!["A"]);
    }

    #[tokio::test]
    async fn rollback_leaves_earlier_batches_alone() {
        let store = Arc::new(MemoryStore::default());
        let detector = detector(&store);
        detector.filter_new(vec![listing("A")]).await.unwrap();

        store.fail_on("C");
        assert!(detector.filter_new(vec![listing("A"), listing("C")]).await.is_err());
        assert!(detector.is_seen("A").await);
        assert!(!detector.is_seen("C").await);
    }

    #[tokio::test]
    async fn preloaded_ids_are_not_new() {
        let store = Arc::new(MemoryStore::with_seen(&["A", "B"]));
        let detector = detector(&store);

        let fresh = detector
            .filter_new(vec![listing("A"), listing("C"), listing("B")])
            .await
            .unwrap();
        assert_eq!(ids(&fresh), vec!["C"]);
        assert_eq!(detector.seen_count().await, 3);
    }

    #[tokio::test]
    async fn preload_happens_once_under_concurrency() {
        let store = Arc::new(MemoryStore::with_seen(&["A"]));
        let detector = Arc::new(detector(&store));

        let calls: Vec<_> = ["X", "Y", "Z"]
            .into_iter()
            .map(|id| {
                let detector = detector.clone();
                tokio::spawn(async move { detector.filter_new(vec![listing(id)]).await })
            })
            .collect();
        for call in calls {
            assert_eq!(call.await.unwrap().unwrap().len(), 1);
        }
        detector.filter_new(vec![listing("A")]).await.unwrap();

        assert_eq!(store.preload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_preload_starts_empty() {
        let store = Arc::new(MemoryStore::with_seen(&["A"]));
        *store.fail_preload.lock().unwrap() = true;
        let detector = detector(&store);

        let fresh = detector.filter_new(vec![listing("A")]).await.unwrap();
        assert_eq!(ids(&fresh), vec!["A"]);
        assert_eq!(store.preload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn preload_can_be_disabled() {
        let store = Arc::new(MemoryStore::with_seen(&["A"]));
        let detector = ChangeDetector::new(store.clone(), false);

        assert_eq!(detector.filter_new(vec![listing("A")]).await.unwrap().len(), 1);
        assert_eq!(store.preload_calls.load(Ordering::SeqCst), 0);
    }
}
