use claim_verify::{
    config::AppConfig,
    db::{self, queries},
    models::job::JobStatus,
    models::verdict::{EntailmentLabel, LabelProbs, Verdict},
    services::queue::QueueManager,
};
use uuid::Uuid;

/// Integration tests for the shared job store and queue manager.
///
/// These require a running PostgreSQL instance configured via
/// DATABASE_URL; run with: cargo test --test integration_test -- --ignored
async fn test_pool() -> sqlx::PgPool {
    let config = AppConfig::from_env().expect("Failed to load config");
    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

fn unique_queue() -> String {
    format!("test-{}", Uuid::new_v4())
}

#[tokio::test]
#[ignore]
async fn enqueue_claim_complete_lifecycle() {
    let pool = test_pool().await;
    let queue_name = unique_queue();

    let job = queries::enqueue(&pool, &queue_name, "Q64", "user_requested", "1.1.1")
        .await
        .expect("enqueue failed");
    assert_eq!(job.status, JobStatus::InQueue);
    assert!(job.processing_started_at.is_none());

    // The canonical record was created alongside the queue job.
    let canonical = queries::get_task_status(&pool, job.task_id)
        .await
        .expect("status lookup failed")
        .expect("canonical record missing");
    assert_eq!(canonical.status, JobStatus::InQueue);
    assert_eq!(canonical.qid, "Q64");

    // Claim flips the job to processing and stamps the start time.
    let claimed = queries::claim_next(&pool, &queue_name)
        .await
        .expect("claim failed")
        .expect("no job claimed");
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.status, JobStatus::Processing);
    assert!(claimed.processing_started_at.is_some());

    // Nothing else is eligible.
    let empty = queries::claim_next(&pool, &queue_name)
        .await
        .expect("claim failed");
    assert!(empty.is_none());
}

#[tokio::test]
#[ignore]
async fn jobs_claimed_oldest_first() {
    let pool = test_pool().await;
    let queue_name = unique_queue();

    let first = queries::enqueue(&pool, &queue_name, "Q1", "test", "1.1.1")
        .await
        .expect("enqueue failed");
    let second = queries::enqueue(&pool, &queue_name, "Q2", "test", "1.1.1")
        .await
        .expect("enqueue failed");

    let a = queries::claim_next(&pool, &queue_name).await.unwrap().unwrap();
    let b = queries::claim_next(&pool, &queue_name).await.unwrap().unwrap();
    assert_eq!(a.id, first.id);
    assert_eq!(b.id, second.id);
}

#[tokio::test]
#[ignore]
async fn concurrent_claims_never_hand_out_the_same_job() {
    let pool = test_pool().await;
    let queue_name = unique_queue();

    const JOBS: usize = 5;
    const CLAIMERS: usize = 20;

    for i in 0..JOBS {
        queries::enqueue(&pool, &queue_name, &format!("Q{i}"), "test", "1.1.1")
            .await
            .expect("enqueue failed");
    }

    let claims = futures::future::join_all(
        (0..CLAIMERS).map(|_| queries::claim_next(&pool, &queue_name)),
    )
    .await;

    let mut claimed_ids: Vec<Uuid> = claims
        .into_iter()
        .map(|r| r.expect("claim errored"))
        .flatten()
        .map(|job| job.id)
        .collect();

    assert_eq!(claimed_ids.len(), JOBS, "every job claimed exactly once");
    claimed_ids.sort();
    claimed_ids.dedup();
    assert_eq!(claimed_ids.len(), JOBS, "no job handed to two claimers");
}

#[tokio::test]
#[ignore]
async fn reconciliation_returns_orphaned_jobs_to_queue() {
    let pool = test_pool().await;
    let queue_name = unique_queue();

    // A worker claims a job and then crashes before writing a completed
    // canonical record.
    let job = queries::enqueue(&pool, &queue_name, "Q64", "test", "1.1.1")
        .await
        .expect("enqueue failed");
    queries::claim_next(&pool, &queue_name)
        .await
        .expect("claim failed")
        .expect("no job claimed");

    let manager = QueueManager::new(pool.clone(), queue_name.clone(), 4);
    let repaired = manager
        .ensure_consistency_in_queue()
        .await
        .expect("reconciliation failed");
    assert_eq!(repaired, 1);

    let recovered = queries::get_job(&pool, job.id)
        .await
        .expect("job lookup failed")
        .expect("job missing");
    assert_eq!(recovered.status, JobStatus::InQueue);
    assert!(recovered.processing_started_at.is_none());

    // The job is claimable again.
    let reclaimed = queries::claim_next(&pool, &queue_name)
        .await
        .expect("claim failed");
    assert!(reclaimed.is_some());
}

#[tokio::test]
#[ignore]
async fn reconciliation_converges_stale_queue_copy_onto_completed_canonical() {
    let pool = test_pool().await;
    let queue_name = unique_queue();

    let job = queries::enqueue(&pool, &queue_name, "Q64", "test", "1.1.1")
        .await
        .expect("enqueue failed");
    let claimed = queries::claim_next(&pool, &queue_name)
        .await
        .expect("claim failed")
        .expect("no job claimed");

    // The task actually finished: the canonical record says completed,
    // but the queue copy still reads processing.
    let mut canonical = queries::get_task_status(&pool, job.task_id)
        .await
        .expect("status lookup failed")
        .expect("canonical record missing");
    canonical.status = JobStatus::Completed;
    canonical.processing_started_at = claimed.processing_started_at;
    canonical.completed_at = Some(chrono::Utc::now());
    queries::upsert_task_status(&pool, &canonical)
        .await
        .expect("status upsert failed");

    let manager = QueueManager::new(pool.clone(), queue_name.clone(), 4);
    manager
        .ensure_consistency_in_queue()
        .await
        .expect("reconciliation failed");

    let converged = queries::get_job(&pool, job.id)
        .await
        .expect("job lookup failed")
        .expect("job missing");
    assert_eq!(converged.status, JobStatus::Completed);
}

#[tokio::test]
#[ignore]
async fn confirm_processing_resets_unfinished_jobs() {
    let pool = test_pool().await;
    let queue_name = unique_queue();

    queries::enqueue(&pool, &queue_name, "Q64", "test", "1.1.1")
        .await
        .expect("enqueue failed");

    let manager = QueueManager::new(pool.clone(), queue_name.clone(), 4);
    let job = manager
        .get_next_in_queue("caller-a")
        .await
        .expect("claim failed")
        .expect("no job claimed");

    // The remote worker never finished: confirm must push the job back.
    let consistent = manager
        .confirm_processing("caller-a")
        .await
        .expect("confirm failed");
    assert!(!consistent);

    let reverted = queries::get_job(&pool, job.id)
        .await
        .expect("job lookup failed")
        .expect("job missing");
    assert_eq!(reverted.status, JobStatus::InQueue);
    assert!(reverted.processing_started_at.is_none());
}

#[tokio::test]
#[ignore]
async fn reset_request_only_touches_the_callers_job() {
    let pool = test_pool().await;
    let queue_name = unique_queue();

    queries::enqueue(&pool, &queue_name, "Q1", "test", "1.1.1")
        .await
        .expect("enqueue failed");
    queries::enqueue(&pool, &queue_name, "Q2", "test", "1.1.1")
        .await
        .expect("enqueue failed");

    let manager = QueueManager::new(pool.clone(), queue_name.clone(), 4);
    let job_a = manager
        .get_next_in_queue("caller-a")
        .await
        .unwrap()
        .expect("caller-a claim failed");
    let job_b = manager
        .get_next_in_queue("caller-b")
        .await
        .unwrap()
        .expect("caller-b claim failed");

    assert!(manager.reset_request("caller-a").await.expect("reset failed"));

    let a = queries::get_job(&pool, job_a.id).await.unwrap().unwrap();
    let b = queries::get_job(&pool, job_b.id).await.unwrap().unwrap();
    assert_eq!(a.status, JobStatus::InQueue);
    assert_eq!(b.status, JobStatus::Processing);
}

#[tokio::test]
#[ignore]
async fn enqueue_dedup_finds_waiting_qid() {
    let pool = test_pool().await;
    let queue_name = unique_queue();

    let job = queries::enqueue(&pool, &queue_name, "Q64", "test", "1.1.1")
        .await
        .expect("enqueue failed");

    let existing = queries::find_in_queue_by_qid(&pool, &queue_name, "Q64")
        .await
        .expect("dedup lookup failed")
        .expect("waiting job not found");
    assert_eq!(existing.id, job.id);

    // A claimed job no longer blocks a fresh enqueue.
    queries::claim_next(&pool, &queue_name).await.unwrap();
    let gone = queries::find_in_queue_by_qid(&pool, &queue_name, "Q64")
        .await
        .expect("dedup lookup failed");
    assert!(gone.is_none());
}

#[tokio::test]
#[ignore]
async fn verdicts_round_trip_through_the_store() {
    let pool = test_pool().await;
    let queue_name = unique_queue();

    let job = queries::enqueue(&pool, &queue_name, "Q64", "test", "1.1.1")
        .await
        .expect("enqueue failed");

    let verdict = Verdict {
        qid: "Q64".to_string(),
        task_id: job.task_id,
        reference_id: "ref-1".to_string(),
        weighted_label: EntailmentLabel::Supports,
        malon_label: EntailmentLabel::Supports,
        final_label: EntailmentLabel::Supports,
        final_sentence: Some("Berlin is Germany's capital.".to_string()),
        label_probabilities: LabelProbs([0.81, 0.12, 0.07]),
    };
    queries::insert_verdict(&pool, &verdict)
        .await
        .expect("verdict insert failed");

    let stored = queries::list_verdicts(&pool, job.task_id)
        .await
        .expect("verdict lookup failed");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].reference_id, "ref-1");
    assert_eq!(stored[0].final_label, EntailmentLabel::Supports);
    assert_eq!(
        stored[0].final_sentence.as_deref(),
        Some("Berlin is Germany's capital.")
    );
    assert!((stored[0].label_probabilities.0[0] - 0.81).abs() < 1e-9);

    // Verdicts are insert-only: a duplicate key is ignored, not updated.
    let mut replay = verdict.clone();
    replay.final_label = EntailmentLabel::Refutes;
    queries::insert_verdict(&pool, &replay)
        .await
        .expect("verdict replay failed");
    let stored = queries::list_verdicts(&pool, job.task_id)
        .await
        .expect("verdict lookup failed");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].final_label, EntailmentLabel::Supports);
}
