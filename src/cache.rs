//! Single-flight cache of the latest corpus aggregate.
//!
//! The in-memory entry and the durable file sit behind one async mutex, so at
//! most one batch runs at a time and disk writes are serialized. A generation
//! counter, bumped under the lock after every successful population, lets a
//! caller that queued behind a running computation reuse its result instead
//! of starting another one. This holds for forced refreshes too.
//!
//! Status queries (`populated_at`, `info`) read a separate mirror of the
//! population time and never wait for a running computation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::batch::{BatchCoordinator, CancelFlag};
use crate::error::{CacheIoError, PipelineError};
use crate::models::CorpusAggregate;
use crate::persist;
use crate::store::DocumentStore;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub populated_at: DateTime<Utc>,
    pub aggregate: Arc<CorpusAggregate>,
}

/// Metadata about the durable file and the in-memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CacheInfo {
    pub cache_exists: bool,
    /// File size in bytes.
    pub cache_size: u64,
    pub cache_size_mb: f64,
    /// File modification time, RFC 3339.
    pub cache_time: Option<String>,
    pub populated: bool,
    pub populated_at: Option<DateTime<Utc>>,
}

pub struct ResultCache {
    coordinator: BatchCoordinator,
    source: Arc<dyn DocumentStore>,
    path: PathBuf,
    entry: Mutex<Option<CacheEntry>>,
    /// Population time of `entry`. Only written while `entry` is locked.
    status: RwLock<Option<DateTime<Utc>>>,
    /// Only written while `entry` is locked.
    generation: AtomicU64,
    cancel: CancelFlag,
    computations: AtomicU64,
}

impl ResultCache {
    /// Builds the cache and loads whatever `path` holds. A missing or
    /// unusable file leaves the cache empty.
    pub async fn open(
        coordinator: BatchCoordinator,
        source: Arc<dyn DocumentStore>,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();

        let entry = match persist::load(&path).await {
            Ok(Some(saved)) => {
                info!(
                    "Loaded cached analysis from {} ({} posts, cached at {})",
                    path.display(),
                    saved.result.overall_statistics.total_posts,
                    saved.cached_at
                );
                Some(CacheEntry {
                    populated_at: saved.cached_at,
                    aggregate: Arc::new(saved.result),
                })
            }
            Ok(None) => {
                info!("No cached analysis at {}", path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring cached analysis: {}", e);
                None
            }
        };

        Self {
            coordinator,
            source,
            path,
            status: RwLock::new(entry.as_ref().map(|e| e.populated_at)),
            entry: Mutex::new(entry),
            generation: AtomicU64::new(0),
            cancel: CancelFlag::new(),
            computations: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cached aggregate, computing it first when the cache is
    /// empty or `force_refresh` is set.
    ///
    /// A failed computation leaves the previous entry in place.
    pub async fn get(&self, force_refresh: bool) -> Result<Arc<CorpusAggregate>, PipelineError> {
        let seen = self.generation.load(Ordering::SeqCst);
        let mut entry = self.entry.lock().await;

        if let Some(current) = entry.as_ref() {
            // A forced refresh that waited behind another population reuses it.
            if !force_refresh || self.generation.load(Ordering::SeqCst) != seen {
                return Ok(current.aggregate.clone());
            }
        }

        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        self.computations.fetch_add(1, Ordering::SeqCst);
        let report = self
            .coordinator
            .analyze_batch_with_cancel(self.source.clone(), None, &self.cancel)
            .await?;
        if report.cancelled {
            warn!("[{}] Discarding cancelled analysis run", report.run_id);
            return Err(PipelineError::Cancelled);
        }

        let populated_at = Utc::now();
        match persist::save(&self.path, populated_at, &report.aggregate).await {
            Ok(()) => info!("[{}] Saved analysis to {}", report.run_id, self.path.display()),
            Err(e) => error!("[{}] Serving unsaved analysis: {}", report.run_id, e),
        }

        let aggregate = Arc::new(report.aggregate);
        *entry = Some(CacheEntry {
            populated_at,
            aggregate: aggregate.clone(),
        });
        self.set_status(Some(populated_at));
        self.generation.fetch_add(1, Ordering::SeqCst);

        Ok(aggregate)
    }

    fn set_status(&self, populated_at: Option<DateTime<Utc>>) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = populated_at;
    }

    /// When the current entry was computed, `None` while empty. Does not wait
    /// for a running computation.
    pub fn populated_at(&self) -> Option<DateTime<Utc>> {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current entry without computing anything. Waits for a running
    /// computation.
    pub async fn entry(&self) -> Option<CacheEntry> {
        self.entry.lock().await.clone()
    }

    /// Drops the in-memory entry and deletes the durable file.
    pub async fn invalidate(&self) -> Result<(), CacheIoError> {
        let mut entry = self.entry.lock().await;
        *entry = None;
        self.set_status(None);
        self.generation.fetch_add(1, Ordering::SeqCst);
        persist::remove(&self.path).await?;
        info!("Cache cleared ({})", self.path.display());
        Ok(())
    }

    pub async fn info(&self) -> CacheInfo {
        let populated_at = self.populated_at();

        let (cache_exists, cache_size, cache_time) = match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => {
                let modified = meta.modified().ok().map(|t| {
                    DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true)
                });
                (true, meta.len(), modified)
            }
            _ => (false, 0, None),
        };

        CacheInfo {
            cache_exists,
            cache_size,
            cache_size_mb: (cache_size as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0,
            cache_time,
            populated: populated_at.is_some(),
            populated_at,
        }
    }

    /// Cancels any running computation. Later computations fail with
    /// [`PipelineError::Cancelled`]; cached values are still served.
    pub fn shutdown(&self) {
        info!("Cache shutting down");
        self.cancel.cancel();
    }

    /// Number of batch runs started by this cache.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ScoringError;
    use crate::models::{KeywordWeight, SentimentResult};
    use crate::scorer::test_support::ScriptedScorer;
    use crate::scorer::TextScorer;
    use crate::store::MemoryStore;
    use crate::testing::document;

    fn corpus() -> Arc<dyn DocumentStore> {
        Arc::new(MemoryStore::from_documents(vec![
            document("p1", "s=0.9 rust", &["s=0.8 rust", "s=0.7 tokio"]),
            document("p2", "s=0.2 bug", &["s=0.1 bug"]),
        ]))
    }

    async fn open_cache(path: &Path, jitter_ms: u64) -> ResultCache {
        let coordinator = BatchCoordinator::new(Arc::new(ScriptedScorer::with_jitter(jitter_ms)));
        ResultCache::open(coordinator, corpus(), path).await
    }

    #[tokio::test]
    async fn test_get_populates_once_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis_result.json");
        let cache = open_cache(&path, 0).await;
        assert!(cache.entry().await.is_none());

        let first = cache.get(false).await.unwrap();
        let second = cache.get(false).await.unwrap();

        assert_eq!(cache.computations(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.overall_statistics.total_posts, 2);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_reopen_serves_persisted_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis_result.json");
        let computed = open_cache(&path, 0).await.get(false).await.unwrap();

        let reopened = open_cache(&path, 0).await;
        let loaded = reopened.get(false).await.unwrap();

        assert_eq!(reopened.computations(), 0);
        assert_eq!(*loaded, *computed);
    }

    #[tokio::test]
    async fn test_forced_refresh_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(&dir.path().join("r.json"), 0).await;

        cache.get(false).await.unwrap();
        cache.get(true).await.unwrap();

        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_then_get_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        let cache = open_cache(&path, 0).await;
        cache.get(false).await.unwrap();

        cache.invalidate().await.unwrap();
        assert!(cache.entry().await.is_none());
        assert!(!path.exists());

        cache.get(false).await.unwrap();
        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gets_on_empty_cache_share_one_run() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(open_cache(&dir.path().join("r.json"), 5).await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get(false).await.unwrap() })
            })
            .collect();
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(cache.computations(), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_forced_refreshes_share_one_run() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(open_cache(&dir.path().join("r.json"), 20).await);
        cache.get(false).await.unwrap();

        // Hold the lock so every refresh below observes the same generation.
        let guard = cache.entry.lock().await;
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get(true).await.unwrap() })
            })
            .collect();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(guard);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_file_leaves_cache_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        tokio::fs::write(&path, b"{\"cached_at\": \"yesterday\"").await.unwrap();

        let cache = open_cache(&path, 0).await;
        assert!(cache.entry().await.is_none());

        cache.get(false).await.unwrap();
        assert_eq!(cache.computations(), 1);
        assert!(persist::load(&path).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_never_populates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        let cache = open_cache(&path, 0).await;

        cache.shutdown();

        assert!(matches!(cache.get(false).await, Err(PipelineError::Cancelled)));
        assert!(cache.entry().await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unwritable_path_still_serves_fresh_value() {
        let dir = tempfile::tempdir().unwrap();
        // The parent "directory" is a regular file, so every write fails.
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"").await.unwrap();
        let cache = open_cache(&blocker.join("r.json"), 0).await;

        let aggregate = cache.get(false).await.unwrap();

        assert_eq!(aggregate.overall_statistics.total_posts, 2);
        assert!(cache.entry().await.is_some());
        assert!(!cache.info().await.cache_exists);
    }

    #[tokio::test]
    async fn test_info_reports_file_and_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(&dir.path().join("r.json"), 0).await;

        let before = cache.info().await;
        assert!(!before.cache_exists);
        assert!(!before.populated);
        assert_eq!(before.cache_size, 0);
        assert!(before.cache_time.is_none());

        cache.get(false).await.unwrap();
        let after = cache.info().await;
        assert!(after.cache_exists);
        assert!(after.populated);
        assert!(after.cache_size > 0);
        assert!(after.cache_time.is_some());
    }

    /// Sleeps a fixed time on every score call.
    struct SlowScorer {
        delay: Duration,
        inner: ScriptedScorer,
    }

    impl TextScorer for SlowScorer {
        fn score(&self, text: &str) -> Result<SentimentResult, ScoringError> {
            std::thread::sleep(self.delay);
            self.inner.score(text)
        }

        fn extract_keywords(
            &self,
            text: &str,
            top_k: usize,
        ) -> Result<Vec<KeywordWeight>, ScoringError> {
            self.inner.extract_keywords(text, top_k)
        }
    }

    /// Four single-comment documents on one worker at 100ms per score call,
    /// so a full run takes about 800ms.
    async fn open_slow_cache(path: &Path) -> Arc<ResultCache> {
        let scorer = SlowScorer {
            delay: Duration::from_millis(100),
            inner: ScriptedScorer::new(),
        };
        let store = MemoryStore::from_documents(
            (0..4).map(|i| document(&format!("p{i}"), "s=0.7", &["s=0.6 slow"])),
        );
        let coordinator = BatchCoordinator::new(Arc::new(scorer)).with_concurrency(Some(1));
        Arc::new(ResultCache::open(coordinator, Arc::new(store), path).await)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_does_not_wait_for_running_computation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_slow_cache(&dir.path().join("r.json")).await;

        let running = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(false).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let info = tokio::time::timeout(Duration::from_millis(300), cache.info())
            .await
            .expect("info() waited for the computation");
        assert!(!info.populated);
        assert!(cache.populated_at().is_none());
        assert!(!running.is_finished());

        running.await.unwrap().unwrap();
        assert!(cache.info().await.populated);
        assert_eq!(
            cache.populated_at(),
            cache.entry().await.map(|e| e.populated_at)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_during_computation_discards_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        let cache = open_slow_cache(&path).await;

        let running = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(false).await })
        };
        while cache.computations() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.shutdown();

        let result = running.await.unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(cache.computations(), 1);
        assert!(cache.entry().await.is_none());
        assert!(cache.populated_at().is_none());
        assert!(!path.exists());
    }
}
