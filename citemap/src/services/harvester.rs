//! Parallel citation harvesting
//!
//! One worker per subject publication, at most `worker_count` in flight.
//! Workers fold their observations into a single deduplicating
//! [`CitationDataset`] behind a mutex; nothing else is shared except the
//! consecutive-block counter that drives early abort.
//!
//! Failure isolation:
//! - `FetchExhausted` / request failure for a publication skips that
//!   publication only
//! - the same for an author skips that author only
//! - `consecutive_blocks >= block_abort_threshold` cancels every worker; what
//!   was already gathered is kept
//! - caller cancellation behaves the same way
//!
//! Publications an abort leaves unwalked or half-walked are reported as
//! skipped, next to those skipped for their own failures.

use crate::models::{AbortReason, CitationDataset, Publication, SkippedUnit};
use crate::services::source_client::{SourceClient, SourceError, WorkUnit};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Harvesting result, including the gaps left by skipped units
#[derive(Debug, Clone, Default)]
pub struct HarvestOutcome {
    pub dataset: CitationDataset,
    pub skipped_publications: Vec<SkippedUnit>,
    pub skipped_authors: Vec<SkippedUnit>,
    pub abort: Option<AbortReason>,
}

impl HarvestOutcome {
    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }
}

/// Bounded worker pool over [`SourceClient::fetch_citing_works`]
pub struct ParallelHarvester {
    source: Arc<dyn SourceClient>,
    worker_count: usize,
    block_abort_threshold: usize,
}

/// How one worker's walk of a publication ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkEnd {
    /// Stream drained, or ended by the publication's own failure
    Finished { added: usize },
    /// Stopped by cancellation before the stream was drained
    Interrupted { added: usize },
}

/// State shared by every worker of one harvest
struct SharedHarvest {
    dataset: Mutex<CitationDataset>,
    skipped_publications: Mutex<Vec<SkippedUnit>>,
    skipped_authors: Mutex<Vec<SkippedUnit>>,
    consecutive_blocks: AtomicUsize,
    block_abort_threshold: usize,
    abort: Mutex<Option<AbortReason>>,
    cancel: CancellationToken,
}

impl SharedHarvest {
    fn record_success(&self) {
        self.consecutive_blocks.store(0, Ordering::Relaxed);
    }

    fn record_block(&self) {
        let count = self.consecutive_blocks.fetch_add(1, Ordering::Relaxed) + 1;
        if count < self.block_abort_threshold {
            return;
        }
        let mut abort = lock(&self.abort);
        if abort.is_none() {
            tracing::error!(
                consecutive_blocks = count,
                threshold = self.block_abort_threshold,
                "Too many consecutive upstream blocks, aborting harvest"
            );
            *abort = Some(AbortReason::ConsecutiveBlocks {
                count,
                threshold: self.block_abort_threshold,
            });
            self.cancel.cancel();
        }
    }

    fn skip(&self, error: &SourceError, publication: &Publication) {
        let reason = error.to_string();
        match error.unit() {
            Some(WorkUnit::Author(id)) => {
                tracing::warn!(author_id = %id, error = %error, "Skipping citing author");
                lock(&self.skipped_authors).push(SkippedUnit {
                    unit: id.clone(),
                    reason,
                });
            }
            _ => {
                tracing::warn!(
                    publication = %publication.title,
                    error = %error,
                    "Skipping publication"
                );
                lock(&self.skipped_publications).push(SkippedUnit {
                    unit: publication.title.clone(),
                    reason,
                });
            }
        }
    }

    /// Publication left incomplete by an abort
    fn skip_unwalked(&self, publication: &Publication, reason: &str) {
        tracing::debug!(publication = %publication.title, reason, "Publication not fully harvested");
        lock(&self.skipped_publications).push(SkippedUnit {
            unit: publication.title.clone(),
            reason: reason.to_string(),
        });
    }
}

impl ParallelHarvester {
    pub fn new(source: Arc<dyn SourceClient>, worker_count: usize, block_abort_threshold: usize) -> Self {
        Self {
            source,
            worker_count: worker_count.max(1),
            block_abort_threshold: block_abort_threshold.max(1),
        }
    }

    /// Walk the citing works of every publication
    ///
    /// `cancel_token` lets the caller stop the harvest early; the outcome
    /// then holds whatever was gathered up to that point.
    pub async fn harvest(
        &self,
        publications: &[Publication],
        cancel_token: &CancellationToken,
    ) -> HarvestOutcome {
        let shared = SharedHarvest {
            dataset: Mutex::new(CitationDataset::new()),
            skipped_publications: Mutex::new(Vec::new()),
            skipped_authors: Mutex::new(Vec::new()),
            consecutive_blocks: AtomicUsize::new(0),
            block_abort_threshold: self.block_abort_threshold,
            abort: Mutex::new(None),
            cancel: cancel_token.child_token(),
        };

        {
            let mut dataset = lock(&shared.dataset);
            for publication in publications {
                dataset.add_subject_publication(publication);
            }
        }

        tracing::info!(
            publications = publications.len(),
            workers = self.worker_count,
            "Harvesting citing works"
        );

        let finished = AtomicUsize::new(0);
        let total = publications.len();

        stream::iter(publications)
            .map(|publication| {
                let shared = &shared;
                let finished = &finished;
                async move {
                    if shared.cancel.is_cancelled() {
                        shared.skip_unwalked(publication, "harvest stopped before this publication was started");
                        return;
                    }
                    match self.harvest_publication(shared, publication).await {
                        WalkEnd::Finished { added } => {
                            let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                            tracing::info!(
                                publication = %publication.title,
                                new_records = added,
                                progress = format!("{}/{}", done, total),
                                "Publication harvested"
                            );
                        }
                        WalkEnd::Interrupted { added } => {
                            tracing::debug!(publication = %publication.title, kept_records = added, "Walk interrupted");
                            shared.skip_unwalked(publication, "harvest stopped while walking this publication");
                        }
                    }
                }
            })
            .buffer_unordered(self.worker_count)
            .collect::<Vec<()>>()
            .await;

        let mut abort = into_inner(shared.abort);
        if abort.is_none() && cancel_token.is_cancelled() {
            tracing::warn!("Harvest cancelled by caller");
            abort = Some(AbortReason::Cancelled);
        }

        let outcome = HarvestOutcome {
            dataset: into_inner(shared.dataset),
            skipped_publications: into_inner(shared.skipped_publications),
            skipped_authors: into_inner(shared.skipped_authors),
            abort,
        };

        tracing::info!(
            records = outcome.dataset.record_count(),
            authors = outcome.dataset.author_count(),
            skipped_publications = outcome.skipped_publications.len(),
            skipped_authors = outcome.skipped_authors.len(),
            aborted = outcome.is_aborted(),
            "Harvest finished"
        );
        outcome
    }

    /// One worker: drain the citing-works stream of `publication`
    async fn harvest_publication(&self, shared: &SharedHarvest, publication: &Publication) -> WalkEnd {
        let mut works = self.source.fetch_citing_works(publication);
        let mut added = 0;

        loop {
            let item = tokio::select! {
                _ = shared.cancel.cancelled() => {
                    tracing::debug!(publication = %publication.title, "Harvest worker cancelled");
                    return WalkEnd::Interrupted { added };
                }
                item = works.next() => item,
            };
            let Some(item) = item else {
                break;
            };

            match item {
                Ok(work) => {
                    shared.record_success();
                    if lock(&shared.dataset).insert_citation(work, publication) {
                        added += 1;
                    }
                }
                Err(SourceError::NotFound(_)) => break,
                Err(e) => {
                    if e.is_blocked() {
                        shared.record_block();
                    }
                    let publication_scoped = !matches!(e.unit(), Some(WorkUnit::Author(_)));
                    shared.skip(&e, publication);
                    if publication_scoped {
                        break;
                    }
                }
            }
        }
        WalkEnd::Finished { added }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn into_inner<T>(mutex: Mutex<T>) -> T {
    mutex
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
