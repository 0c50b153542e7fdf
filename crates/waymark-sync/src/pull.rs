//! Batched pull with chunked transactional application
//!
//! Remote batches are applied in fixed-size chunks, each inside its own
//! repository transaction that is committed and released before the next
//! chunk starts. The chunk size is a tuning constant: it bounds peak memory
//! and transaction size for large initial syncs, and any positive value
//! yields the same final state.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use waymark_core::db::ObservationRepository;
use waymark_core::models::Observation;

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::reconcile::{self, Decision};
use crate::service::RemoteService;

/// Default number of records applied per transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 250;

/// What the surrounding app should tell the user after a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullNotification {
    /// Nothing new arrived
    None,
    /// Exactly one new record arrived during an incremental pull
    Single(Box<Observation>),
    /// Initial sync, or more than one new record
    Bulk(usize),
}

/// Outcome counters for one pull cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    /// Newly created local records
    pub created: usize,
    /// Existing records overwritten with remote content
    pub updated: usize,
    /// Records removed by server archival
    pub deleted: usize,
    /// Records skipped (dirty, unchanged, malformed)
    pub skipped: usize,
    /// False when the pull stopped early (commit failure or cancellation);
    /// committed chunks remain committed and the next watermark resumes
    pub complete: bool,
    /// The notification to emit for this cycle
    pub notification: PullNotification,
}

/// Drives batched retrieval and chunked reconciliation.
pub struct PullCoordinator<'a, R, S> {
    repo: &'a R,
    service: &'a S,
    chunk_size: usize,
    cancelled: AtomicBool,
}

impl<'a, R: ObservationRepository, S: RemoteService> PullCoordinator<'a, R, S> {
    /// Create a coordinator over a repository and remote service.
    pub fn new(repo: &'a R, service: &'a S) -> Self {
        Self {
            repo,
            service,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Override the records-per-transaction tuning constant.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        self.chunk_size = chunk_size;
        self
    }

    /// Stop scheduling further chunks; the current chunk finishes normally.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Pull observations modified at or after `since` and reconcile them.
    pub async fn pull(
        &self,
        ctx: &SyncContext,
        since: Option<DateTime<Utc>>,
        is_initial: bool,
    ) -> SyncResult<PullReport> {
        let values = self
            .service
            .fetch_observations(&ctx.event_remote_id, since)
            .await?;

        tracing::debug!(
            event = %ctx.event_remote_id,
            records = values.len(),
            "pulled observation batch"
        );

        let mut report = PullReport {
            created: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            complete: true,
            notification: PullNotification::None,
        };
        // Records arrive newest-first, so the first create is the most
        // recently created one
        let mut newest_created: Option<Observation> = None;

        for chunk in values.chunks(self.chunk_size) {
            if self.cancelled.load(Ordering::SeqCst) {
                report.complete = false;
                break;
            }

            let committed = self.repo.in_transaction(|repo| {
                let mut counts = ChunkCounts::default();
                for value in chunk {
                    match reconcile::reconcile(repo, ctx, value) {
                        Ok(Decision::Created(observation)) => {
                            counts.created += 1;
                            if counts.newest_created.is_none() {
                                counts.newest_created = Some(observation);
                            }
                        }
                        Ok(Decision::Updated(_)) => counts.updated += 1,
                        Ok(Decision::Deleted) => counts.deleted += 1,
                        Ok(Decision::Skipped(_)) => counts.skipped += 1,
                        // One bad record never aborts the chunk
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping unreconcilable record");
                            counts.skipped += 1;
                        }
                    }
                }
                Ok(counts)
            });

            match committed {
                Ok(counts) => {
                    report.created += counts.created;
                    report.updated += counts.updated;
                    report.deleted += counts.deleted;
                    report.skipped += counts.skipped;
                    if newest_created.is_none() {
                        newest_created = counts.newest_created;
                    }
                }
                // True commit failure: the chunk's mutations did not apply;
                // stop here and report the partial progress
                Err(e) => {
                    tracing::warn!(error = %e, "pull stopped at chunk boundary");
                    report.complete = false;
                    break;
                }
            }
        }

        report.notification = notification(&report, is_initial, newest_created);
        Ok(report)
    }
}

/// Per-chunk counters accumulated inside the transaction.
#[derive(Default)]
struct ChunkCounts {
    created: usize,
    updated: usize,
    deleted: usize,
    skipped: usize,
    newest_created: Option<Observation>,
}

fn notification(
    report: &PullReport,
    is_initial: bool,
    newest_created: Option<Observation>,
) -> PullNotification {
    if report.created == 0 {
        return PullNotification::None;
    }
    if is_initial || report.created > 1 {
        return PullNotification::Bulk(report.created);
    }
    newest_created.map_or(PullNotification::Bulk(report.created), |observation| {
        PullNotification::Single(Box::new(observation))
    })
}
