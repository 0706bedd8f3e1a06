use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{JobRecord, JobStatus, TaskStatusRecord};
use crate::models::verdict::{EntailmentLabel, LabelProbs, PageFetchRecord, ProcessingStats, Verdict};

/// Errors surfaced by the shared job store. Transport loss is kept distinct
/// from other database failures so callers can apply bounded retry.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection lost: {0}")]
    Connection(sqlx::Error),

    #[error("store operation failed: {0}")]
    Database(sqlx::Error),

    #[error("invalid value in store: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => StoreError::Connection(e),
            other => StoreError::Database(other),
        }
    }
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, StoreError> {
    let status_str: String = row.try_get("status").map_err(StoreError::from)?;
    let status: JobStatus = status_str
        .parse()
        .map_err(|_| StoreError::Decode(format!("unknown job status '{status_str}'")))?;

    Ok(JobRecord {
        id: row.try_get("id").map_err(StoreError::from)?,
        qid: row.try_get("qid").map_err(StoreError::from)?,
        task_id: row.try_get("task_id").map_err(StoreError::from)?,
        queue: row.try_get("queue").map_err(StoreError::from)?,
        status,
        request_type: row.try_get("request_type").map_err(StoreError::from)?,
        algo_version: row.try_get("algo_version").map_err(StoreError::from)?,
        requested_at: row.try_get("requested_at").map_err(StoreError::from)?,
        processing_started_at: row
            .try_get("processing_started_at")
            .map_err(StoreError::from)?,
        completed_at: row.try_get("completed_at").map_err(StoreError::from)?,
        last_updated: row.try_get("last_updated").map_err(StoreError::from)?,
        retry_count: row.try_get("retry_count").map_err(StoreError::from)?,
        error_message: row.try_get("error_message").map_err(StoreError::from)?,
    })
}

fn status_from_row(row: &PgRow) -> Result<TaskStatusRecord, StoreError> {
    let status_str: String = row.try_get("status").map_err(StoreError::from)?;
    let status: JobStatus = status_str
        .parse()
        .map_err(|_| StoreError::Decode(format!("unknown task status '{status_str}'")))?;

    Ok(TaskStatusRecord {
        qid: row.try_get("qid").map_err(StoreError::from)?,
        task_id: row.try_get("task_id").map_err(StoreError::from)?,
        status,
        request_type: row.try_get("request_type").map_err(StoreError::from)?,
        algo_version: row.try_get("algo_version").map_err(StoreError::from)?,
        requested_at: row.try_get("requested_at").map_err(StoreError::from)?,
        processing_started_at: row
            .try_get("processing_started_at")
            .map_err(StoreError::from)?,
        completed_at: row.try_get("completed_at").map_err(StoreError::from)?,
        last_updated: row.try_get("last_updated").map_err(StoreError::from)?,
        error_message: row.try_get("error_message").map_err(StoreError::from)?,
    })
}

const JOB_COLUMNS: &str = "id, qid, task_id, queue, status, request_type, algo_version, \
     requested_at, processing_started_at, completed_at, last_updated, retry_count, error_message";

/// Insert a new job into a queue and its canonical status record.
/// `task_id` is generated here, once per enqueue, and never reused.
pub async fn enqueue(
    pool: &PgPool,
    queue: &str,
    qid: &str,
    request_type: &str,
    algo_version: &str,
) -> Result<JobRecord, StoreError> {
    let task_id = Uuid::new_v4();

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO queue_jobs (qid, task_id, queue, status, request_type, algo_version)
        VALUES ($1, $2, $3, 'in_queue', $4, $5)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(qid)
    .bind(task_id)
    .bind(queue)
    .bind(request_type)
    .bind(algo_version)
    .fetch_one(pool)
    .await?;

    let job = job_from_row(&row)?;

    sqlx::query(
        r#"
        INSERT INTO task_status (qid, task_id, status, request_type, algo_version, requested_at)
        VALUES ($1, $2, 'in_queue', $3, $4, $5)
        ON CONFLICT (task_id, qid) DO NOTHING
        "#,
    )
    .bind(qid)
    .bind(task_id)
    .bind(request_type)
    .bind(algo_version)
    .bind(job.requested_at)
    .execute(pool)
    .await?;

    Ok(job)
}

/// Atomically claim the oldest `in_queue` job in a queue. The selection and
/// the flip to `processing` happen in a single statement; `SKIP LOCKED`
/// keeps two workers from observing the same row.
pub async fn claim_next(pool: &PgPool, queue: &str) -> Result<Option<JobRecord>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE queue_jobs
        SET status = 'processing',
            processing_started_at = NOW(),
            last_updated = NOW()
        WHERE id = (
            SELECT id FROM queue_jobs
            WHERE queue = $1 AND status = 'in_queue' AND processing_started_at IS NULL
            ORDER BY requested_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(queue)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Revert a `processing` job back to `in_queue`. Only applies when
/// `processing_started_at` is set; returns whether a row was reverted.
pub async fn reset(pool: &PgPool, job_id: Uuid) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE queue_jobs
        SET status = 'in_queue',
            processing_started_at = NULL,
            last_updated = NOW()
        WHERE id = $1 AND status = 'processing' AND processing_started_at IS NOT NULL
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Merge-update a queue job's status fields, stamping `last_updated`.
/// Used by reconciliation to converge a stale queue copy onto the canonical
/// record.
pub async fn update_job_status(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    processing_started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE queue_jobs
        SET status = $2,
            processing_started_at = COALESCE($3, processing_started_at),
            completed_at = COALESCE($4, completed_at),
            error_message = COALESCE($5, error_message),
            last_updated = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(status.to_string())
    .bind(processing_started_at)
    .bind(completed_at)
    .bind(error_message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Upsert the canonical status record keyed by `(task_id, qid)`; absent
/// rows are inserted, present rows merge-updated. Always stamps
/// `last_updated`.
pub async fn upsert_task_status(
    pool: &PgPool,
    record: &TaskStatusRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO task_status (qid, task_id, status, request_type, algo_version,
                                 requested_at, processing_started_at, completed_at,
                                 last_updated, error_message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), $9)
        ON CONFLICT (task_id, qid) DO UPDATE
        SET status = EXCLUDED.status,
            processing_started_at = COALESCE(EXCLUDED.processing_started_at, task_status.processing_started_at),
            completed_at = COALESCE(EXCLUDED.completed_at, task_status.completed_at),
            error_message = COALESCE(EXCLUDED.error_message, task_status.error_message),
            last_updated = NOW()
        "#,
    )
    .bind(&record.qid)
    .bind(record.task_id)
    .bind(record.status.to_string())
    .bind(&record.request_type)
    .bind(&record.algo_version)
    .bind(record.requested_at)
    .bind(record.processing_started_at)
    .bind(record.completed_at)
    .bind(record.error_message.as_deref())
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch the canonical status record for a task.
pub async fn get_task_status(
    pool: &PgPool,
    task_id: Uuid,
) -> Result<Option<TaskStatusRecord>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT qid, task_id, status, request_type, algo_version, requested_at,
               processing_started_at, completed_at, last_updated, error_message
        FROM task_status
        WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(status_from_row).transpose()
}

/// Fetch a queue job by its id.
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<JobRecord>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// All jobs of a queue currently marked `processing`.
pub async fn list_processing(pool: &PgPool, queue: &str) -> Result<Vec<JobRecord>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE queue = $1 AND status = 'processing'"
    ))
    .bind(queue)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Whether a qid already has an `in_queue` job in the given queue.
/// Used to deduplicate enqueue requests.
pub async fn find_in_queue_by_qid(
    pool: &PgPool,
    queue: &str,
    qid: &str,
) -> Result<Option<JobRecord>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE queue = $1 AND qid = $2 AND status = 'in_queue' LIMIT 1"
    ))
    .bind(queue)
    .bind(qid)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Number of jobs waiting in a queue.
pub async fn queue_depth(pool: &PgPool, queue: &str) -> Result<i64, StoreError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS depth FROM queue_jobs WHERE queue = $1 AND status = 'in_queue'",
    )
    .bind(queue)
    .fetch_one(pool)
    .await?;

    row.try_get("depth").map_err(StoreError::from)
}

/// Insert one verdict record. Verdicts are keyed `(task_id, reference_id)`
/// and never updated in place.
pub async fn insert_verdict(pool: &PgPool, verdict: &Verdict) -> Result<(), StoreError> {
    let probs = serde_json::to_value(verdict.label_probabilities)
        .map_err(|e| StoreError::Decode(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO verdicts (qid, task_id, reference_id, weighted_label, malon_label,
                              final_label, final_sentence, label_probabilities)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (task_id, reference_id) DO NOTHING
        "#,
    )
    .bind(&verdict.qid)
    .bind(verdict.task_id)
    .bind(&verdict.reference_id)
    .bind(verdict.weighted_label.to_string())
    .bind(verdict.malon_label.to_string())
    .bind(verdict.final_label.to_string())
    .bind(verdict.final_sentence.as_deref())
    .bind(probs)
    .execute(pool)
    .await?;

    Ok(())
}

/// All verdicts recorded for a task.
pub async fn list_verdicts(pool: &PgPool, task_id: Uuid) -> Result<Vec<Verdict>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT qid, task_id, reference_id, weighted_label, malon_label,
               final_label, final_sentence, label_probabilities
        FROM verdicts
        WHERE task_id = $1
        ORDER BY reference_id
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let probs_json: serde_json::Value =
                row.try_get("label_probabilities").map_err(StoreError::from)?;
            let label_probabilities: LabelProbs = serde_json::from_value(probs_json)
                .map_err(|e| StoreError::Decode(e.to_string()))?;

            Ok(Verdict {
                qid: row.try_get("qid").map_err(StoreError::from)?,
                task_id: row.try_get("task_id").map_err(StoreError::from)?,
                reference_id: row.try_get("reference_id").map_err(StoreError::from)?,
                weighted_label: label_from_row(row, "weighted_label")?,
                malon_label: label_from_row(row, "malon_label")?,
                final_label: label_from_row(row, "final_label")?,
                final_sentence: row.try_get("final_sentence").map_err(StoreError::from)?,
                label_probabilities,
            })
        })
        .collect()
}

fn label_from_row(row: &PgRow, col: &str) -> Result<EntailmentLabel, StoreError> {
    let s: String = row.try_get(col).map_err(StoreError::from)?;
    s.parse()
        .map_err(|_| StoreError::Decode(format!("unknown entailment label '{s}'")))
}

/// Upsert fetch metadata for one (task, reference) pair.
pub async fn upsert_page_fetch(
    pool: &PgPool,
    record: &PageFetchRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO page_fetches (task_id, qid, reference_id, url, status_code,
                                  error_message, sentence_count, window_count, fetched_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (task_id, reference_id) DO UPDATE
        SET status_code = EXCLUDED.status_code,
            error_message = EXCLUDED.error_message,
            sentence_count = EXCLUDED.sentence_count,
            window_count = EXCLUDED.window_count,
            fetched_at = EXCLUDED.fetched_at
        "#,
    )
    .bind(record.task_id)
    .bind(&record.qid)
    .bind(&record.reference_id)
    .bind(&record.url)
    .bind(record.status_code)
    .bind(record.error_message.as_deref())
    .bind(record.sentence_count)
    .bind(record.window_count)
    .bind(record.fetched_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Upsert processing statistics for a task.
pub async fn upsert_processing_stats(
    pool: &PgPool,
    stats: &ProcessingStats,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO processing_stats (task_id, qid, claim_count, reference_count,
                                      fetched_ok_count, evidence_count, duration_ms)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (task_id) DO UPDATE
        SET claim_count = EXCLUDED.claim_count,
            reference_count = EXCLUDED.reference_count,
            fetched_ok_count = EXCLUDED.fetched_ok_count,
            evidence_count = EXCLUDED.evidence_count,
            duration_ms = EXCLUDED.duration_ms
        "#,
    )
    .bind(stats.task_id)
    .bind(&stats.qid)
    .bind(stats.claim_count)
    .bind(stats.reference_count)
    .bind(stats.fetched_ok_count)
    .bind(stats.evidence_count)
    .bind(stats.duration_ms)
    .execute(pool)
    .await?;

    Ok(())
}
