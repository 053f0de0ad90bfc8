//! Parallel batch analysis of a whole corpus.
//!
//! A batch run lists the source, spawns a fixed set of workers that each own
//! a [`DocumentAnalyzer`], feeds them document keys over a shared queue and
//! folds their results into a [`CorpusAggregate`] as they arrive.
//!
//! ## Ordering
//! Results are merged in completion order. Every reducer is commutative
//! (integer sums, label counts, the additive [`WeightMap`]) and the bucket id
//! lists are sorted at the end, so the aggregate is identical for any
//! completion order. The one exception is `posts`, which keeps completion
//! order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analyzer::DocumentAnalyzer;
use crate::error::{DocumentReadError, PipelineError};
use crate::models::{
    CorpusAggregate, CorpusStatistics, PerDocumentAnalysis, PostsBySentiment,
    SentimentDistribution, SentimentLabel, NEUTRAL_SCORE,
};
use crate::scorer::TextScorer;
use crate::store::DocumentStore;
use crate::tally::{FixedSum, WeightMap};

/// Hard upper bound on workers chosen automatically.
pub const MAX_WORKERS: usize = 8;
/// Keywords kept for the whole corpus.
pub const CORPUS_TOP_KEYWORDS: usize = 50;

/// Picks the pool size for `documents` jobs.
///
/// Without an override this is `min(available, documents, MAX_WORKERS)`. An
/// override is honoured but never exceeds the number of documents. The result
/// is at least 1.
pub fn worker_count(available: usize, documents: usize, requested: Option<usize>) -> usize {
    let wanted = match requested {
        Some(n) => n.min(documents),
        None => available.min(documents).min(MAX_WORKERS),
    };
    wanted.max(1)
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Best-effort cancellation signal shared between a batch and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to the documents of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub documents_listed: u64,
    pub analyzed: u64,
    pub read_failures: u64,
    pub analysis_failures: u64,
    /// Not started, or finished after cancellation and discarded.
    pub skipped: u64,
}

#[derive(Debug)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub aggregate: CorpusAggregate,
    pub stats: BatchStats,
    pub cancelled: bool,
}

enum WorkerOutcome {
    Analyzed(PerDocumentAnalysis),
    ReadFailed(DocumentReadError),
    AnalysisFailed { key: String, reason: String },
    Skipped,
}

/// Running corpus totals. `absorb` commutes: absorbing the same analyses in
/// any order yields the same `finish` output apart from `posts` order.
#[derive(Default)]
struct CorpusAccumulator {
    total_comments: u64,
    processed_comments: u64,
    document_scores: FixedSum,
    distribution: SentimentDistribution,
    buckets: PostsBySentiment,
    keywords: WeightMap,
    posts: Vec<PerDocumentAnalysis>,
}

impl CorpusAccumulator {
    fn absorb(&mut self, analysis: PerDocumentAnalysis) {
        let stats = &analysis.overall_statistics;

        self.total_comments += stats.total_comments;
        self.processed_comments += stats.processed_comments;
        self.document_scores.add(stats.avg_sentiment_score);
        self.distribution.merge(&stats.sentiment_distribution);
        self.buckets.push(
            SentimentLabel::for_score(stats.avg_sentiment_score),
            analysis.post_id().to_string(),
        );
        self.keywords.extend(&analysis.top_keywords);
        self.posts.push(analysis);
    }

    fn finish(mut self) -> CorpusAggregate {
        self.buckets.sort();
        debug_assert_eq!(self.distribution.total(), self.processed_comments);

        CorpusAggregate {
            overall_statistics: CorpusStatistics {
                total_posts: self.posts.len() as u64,
                total_comments: self.total_comments,
                processed_comments: self.processed_comments,
                avg_sentiment_score: self.document_scores.mean().unwrap_or(NEUTRAL_SCORE),
                sentiment_distribution: self.distribution,
                posts_by_sentiment: self.buckets,
            },
            top_keywords: self.keywords.top(CORPUS_TOP_KEYWORDS),
            posts: self.posts,
        }
    }
}

/// One pool member. Holds its analyzer for the lifetime of the run.
struct Worker {
    id: usize,
    analyzer: Arc<DocumentAnalyzer>,
    source: Arc<dyn DocumentStore>,
}

impl Worker {
    async fn run(
        self,
        jobs: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
        results: mpsc::UnboundedSender<WorkerOutcome>,
        cancel: CancelFlag,
    ) {
        let mut handled = 0usize;

        loop {
            let key = { jobs.lock().await.recv().await };
            let Some(key) = key else { break };

            let outcome = if cancel.is_cancelled() {
                WorkerOutcome::Skipped
            } else {
                handled += 1;
                self.process(key).await
            };

            if results.send(outcome).is_err() {
                break;
            }
        }

        tracing::debug!("Worker {} done after {} documents", self.id, handled);
    }

    async fn process(&self, key: String) -> WorkerOutcome {
        let analyzer = self.analyzer.clone();
        let source = self.source.clone();
        let job_key = key.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let document = source.read(&job_key)?;
            Ok::<_, DocumentReadError>(analyzer.analyze(&document))
        })
        .await;

        match joined {
            Ok(Ok(analysis)) => WorkerOutcome::Analyzed(analysis),
            Ok(Err(e)) => WorkerOutcome::ReadFailed(e),
            Err(e) => WorkerOutcome::AnalysisFailed {
                key,
                reason: e.to_string(),
            },
        }
    }
}

/// Fans document analysis out over a worker pool and folds the results.
#[derive(Clone)]
pub struct BatchCoordinator {
    scorer: Arc<dyn TextScorer>,
    concurrency: Option<usize>,
}

impl BatchCoordinator {
    pub fn new(scorer: Arc<dyn TextScorer>) -> Self {
        Self {
            scorer,
            concurrency: None,
        }
    }

    /// Default worker override used when a call does not pass its own.
    pub fn with_concurrency(mut self, workers: Option<usize>) -> Self {
        self.concurrency = workers;
        self
    }

    pub async fn analyze_batch(
        &self,
        source: Arc<dyn DocumentStore>,
        concurrency: Option<usize>,
    ) -> Result<CorpusAggregate, PipelineError> {
        let report = self
            .analyze_batch_with_cancel(source, concurrency, &CancelFlag::new())
            .await?;
        Ok(report.aggregate)
    }

    /// Runs one batch. Only an unlistable source is an error; per-document
    /// failures are logged, counted in the report and left out.
    pub async fn analyze_batch_with_cancel(
        &self,
        source: Arc<dyn DocumentStore>,
        concurrency: Option<usize>,
        cancel: &CancelFlag,
    ) -> Result<BatchReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let location = source.describe();

        let lister = source.clone();
        let keys = tokio::task::spawn_blocking(move || lister.list())
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))??;

        let mut stats = BatchStats {
            documents_listed: keys.len() as u64,
            ..BatchStats::default()
        };

        if keys.is_empty() {
            info!("[{}] No documents found in {}", run_id, location);
            return Ok(BatchReport {
                run_id,
                aggregate: CorpusAggregate::empty(),
                stats,
                cancelled: cancel.is_cancelled(),
            });
        }

        let workers = worker_count(
            available_parallelism(),
            keys.len(),
            concurrency.or(self.concurrency),
        );
        info!(
            "[{}] Analyzing {} documents from {} with {} workers",
            run_id,
            keys.len(),
            location,
            workers
        );

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        for key in keys {
            // The receiver is alive until the workers exit, so this cannot fail.
            let _ = job_tx.send(key);
        }
        drop(job_tx);

        let jobs = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    analyzer: Arc::new(DocumentAnalyzer::new(self.scorer.clone())),
                    source: source.clone(),
                };
                tokio::spawn(worker.run(jobs.clone(), result_tx.clone(), cancel.clone()))
            })
            .collect();
        drop(result_tx);

        let mut accumulator = CorpusAccumulator::default();
        while let Some(outcome) = result_rx.recv().await {
            match outcome {
                WorkerOutcome::Analyzed(analysis) => {
                    if cancel.is_cancelled() {
                        stats.skipped += 1;
                    } else {
                        stats.analyzed += 1;
                        accumulator.absorb(analysis);
                    }
                }
                WorkerOutcome::ReadFailed(e) => {
                    stats.read_failures += 1;
                    warn!("[{}] Skipping document {}: {}", run_id, e.key(), e);
                }
                WorkerOutcome::AnalysisFailed { key, reason } => {
                    stats.analysis_failures += 1;
                    error!("[{}] Analysis of {} aborted: {}", run_id, key, reason);
                }
                WorkerOutcome::Skipped => stats.skipped += 1,
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("[{}] Worker task failed: {}", run_id, e);
            }
        }

        let cancelled = cancel.is_cancelled();
        let aggregate = accumulator.finish();
        info!(
            "[{}] Batch finished{}: {} analyzed, {} unreadable, {} failed, {} skipped; avg score {}",
            run_id,
            if cancelled { " (cancelled)" } else { "" },
            stats.analyzed,
            stats.read_failures,
            stats.analysis_failures,
            stats.skipped,
            aggregate.overall_statistics.avg_sentiment_score
        );

        Ok(BatchReport {
            run_id,
            aggregate,
            stats,
            cancelled,
        })
    }
}
