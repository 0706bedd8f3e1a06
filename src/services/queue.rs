use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use uuid::Uuid;

use crate::db::queries::{self, StoreError};
use crate::models::job::{JobRecord, JobStatus};

/// Bounded retries for store operations that hit a connection failure.
const RETRY_LIMIT: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Manages one job queue on top of the shared store.
///
/// The queue record is only ever a hint; the canonical `task_status` record
/// is the source of truth. Reconciliation converges stale queue copies onto
/// it and returns orphaned `processing` jobs (crashed workers) to
/// circulation.
pub struct QueueManager {
    pool: PgPool,
    queue: String,
    claim_slots: Semaphore,
    /// caller id → id of the job that caller last claimed. Lets a caller
    /// confirm or undo only its own claim, never another caller's.
    request_tracker: Mutex<HashMap<String, Uuid>>,
}

impl QueueManager {
    pub fn new(pool: PgPool, queue: impl Into<String>, max_concurrent_claims: usize) -> Self {
        Self {
            pool,
            queue: queue.into(),
            claim_slots: Semaphore::new(max_concurrent_claims.max(1)),
            request_tracker: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    fn tracked_job(&self, caller_id: &str) -> Option<Uuid> {
        self.request_tracker
            .lock()
            .expect("request tracker poisoned")
            .get(caller_id)
            .copied()
    }

    fn track(&self, caller_id: &str, job_id: Uuid) {
        self.request_tracker
            .lock()
            .expect("request tracker poisoned")
            .insert(caller_id.to_string(), job_id);
    }

    fn untrack(&self, caller_id: &str) {
        self.request_tracker
            .lock()
            .expect("request tracker poisoned")
            .remove(caller_id);
    }

    /// Claim the oldest eligible job for `caller_id`. Claim attempts are
    /// bounded by a counting semaphore; connection failures are retried a
    /// bounded number of times before surfacing.
    pub async fn get_next_in_queue(
        &self,
        caller_id: &str,
    ) -> Result<Option<JobRecord>, QueueError> {
        let _permit = self
            .claim_slots
            .acquire()
            .await
            .expect("claim semaphore closed");

        let job = retry_on_connection_loss(|| queries::claim_next(&self.pool, &self.queue)).await?;

        match job {
            Some(job) => {
                tracing::info!(
                    queue = %self.queue,
                    caller_id = %caller_id,
                    task_id = %job.task_id,
                    qid = %job.qid,
                    "Claimed next job in queue"
                );
                self.track(caller_id, job.id);
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Re-check the caller's tracked job against the canonical record.
    /// Returns true (and forgets the claim) when the canonical record says
    /// `completed`; otherwise the job goes back to the queue and false is
    /// returned. Callers with no tracked job are trivially consistent.
    pub async fn confirm_processing(&self, caller_id: &str) -> Result<bool, QueueError> {
        let Some(job_id) = self.tracked_job(caller_id) else {
            return Ok(true);
        };

        let consistent =
            retry_on_connection_loss(|| self.ensure_consistency_per_service(job_id)).await?;

        if consistent {
            self.untrack(caller_id);
        }
        Ok(consistent)
    }

    /// Unconditionally return the caller's tracked job to the queue.
    /// Used for explicit cancellation.
    pub async fn reset_request(&self, caller_id: &str) -> Result<bool, QueueError> {
        let Some(job_id) = self.tracked_job(caller_id) else {
            return Ok(true);
        };

        let reverted = retry_on_connection_loss(|| queries::reset(&self.pool, job_id)).await?;
        if reverted {
            tracing::info!(queue = %self.queue, job_id = %job_id, "Returned job to queue");
            self.untrack(caller_id);
        } else {
            tracing::error!(queue = %self.queue, job_id = %job_id, "Could not revert tracked job");
        }
        Ok(reverted)
    }

    /// Consistency check for a single claimed job, keyed by its queue id.
    async fn ensure_consistency_per_service(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let Some(job) = queries::get_job(&self.pool, job_id).await? else {
            tracing::error!(queue = %self.queue, job_id = %job_id, "Tracked job vanished from queue");
            return Ok(false);
        };

        if job.status != JobStatus::Completed {
            tracing::warn!(
                queue = %self.queue,
                job_id = %job_id,
                status = %job.status,
                "Job not completed in queue, returning to circulation"
            );
            queries::reset(&self.pool, job_id).await?;
            return Ok(false);
        }

        match queries::get_task_status(&self.pool, job.task_id).await? {
            Some(canonical) if canonical.status == JobStatus::Completed => {
                tracing::debug!(queue = %self.queue, job_id = %job_id, "Job consistent with canonical record");
                Ok(true)
            }
            Some(_) => {
                tracing::warn!(
                    queue = %self.queue,
                    job_id = %job_id,
                    "Canonical record not completed, returning job to queue"
                );
                queries::reset(&self.pool, job_id).await?;
                Ok(false)
            }
            None => {
                tracing::warn!(
                    queue = %self.queue,
                    job_id = %job_id,
                    "No canonical record for job, returning to queue"
                );
                queries::reset(&self.pool, job_id).await?;
                Ok(false)
            }
        }
    }

    /// Reconciliation pass over every `processing` job in this queue:
    /// queue copies that the canonical record says are `completed` are
    /// converged; the rest are orphans from crashed workers and go back to
    /// `in_queue`. Jobs currently tracked by a live caller are skipped.
    /// Returns the number of repaired jobs.
    pub async fn ensure_consistency_in_queue(&self) -> Result<usize, QueueError> {
        let jobs = queries::list_processing(&self.pool, &self.queue).await?;
        let tracked: HashSet<Uuid> = self
            .request_tracker
            .lock()
            .expect("request tracker poisoned")
            .values()
            .copied()
            .collect();

        let mut repaired = 0;
        for job in jobs {
            if tracked.contains(&job.id) {
                tracing::debug!(queue = %self.queue, job_id = %job.id, "Job tracked by live caller, skipping");
                continue;
            }

            match queries::get_task_status(&self.pool, job.task_id).await? {
                Some(canonical) if canonical.status == JobStatus::Completed => {
                    tracing::warn!(
                        queue = %self.queue,
                        job_id = %job.id,
                        task_id = %job.task_id,
                        "Queue copy stale, converging onto completed canonical record"
                    );
                    queries::update_job_status(
                        &self.pool,
                        job.id,
                        JobStatus::Completed,
                        canonical.processing_started_at,
                        canonical.completed_at,
                        None,
                    )
                    .await?;
                    repaired += 1;
                }
                _ => {
                    tracing::warn!(
                        queue = %self.queue,
                        job_id = %job.id,
                        task_id = %job.task_id,
                        "Orphaned processing job, returning to queue"
                    );
                    queries::reset(&self.pool, job.id).await?;
                    repaired += 1;
                }
            }
        }

        Ok(repaired)
    }

    /// Jobs currently waiting in this queue.
    pub async fn depth(&self) -> Result<i64, QueueError> {
        Ok(queries::queue_depth(&self.pool, &self.queue).await?)
    }
}

/// Run a store operation, retrying on connection loss with fixed backoff
/// up to [`RETRY_LIMIT`] attempts.
async fn retry_on_connection_loss<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_connection() && attempt < RETRY_LIMIT => {
                attempt += 1;
                tracing::warn!(attempt, error = %e, "Store connection lost, retrying");
                sleep(RETRY_BACKOFF).await;
            }
            other => return other,
        }
    }
}
