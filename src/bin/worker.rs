use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use claim_verify::{
    config::AppConfig,
    db::{self, queries},
    models::job::{JobRecord, JobStatus, TaskStatusRecord},
    services::{
        aggregation::EntailmentAggregator,
        extractor::ExtractorClient,
        fetch::PageFetcher,
        inference::{EntailmentServiceClient, RelevanceClient},
        pipeline::ClaimPipeline,
        queue::QueueManager,
        selection::EvidenceSelector,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting claim-check worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize external service clients
    tracing::info!("Initializing inference and extractor clients");
    let model_timeout = Duration::from_secs(config.model_timeout_secs);
    let scorer = RelevanceClient::new(&config.relevance_url, model_timeout)
        .expect("Failed to initialize relevance client");
    let classifier = EntailmentServiceClient::new(&config.entailment_url, model_timeout)
        .expect("Failed to initialize entailment client");
    let extractor = ExtractorClient::new(&config.extractor_url, model_timeout)
        .expect("Failed to initialize extractor client");
    let fetcher = PageFetcher::new(Duration::from_secs(config.fetch_timeout_secs))
        .expect("Failed to initialize page fetcher");

    let selector = EvidenceSelector::new(
        config.evidence_top_n,
        config.scoring_batch_size,
        config.max_sentence_len,
    );
    let aggregator = EntailmentAggregator::new(config.score_threshold, config.scoring_batch_size);

    let pipeline = ClaimPipeline::new(
        extractor,
        fetcher,
        selector,
        aggregator,
        Arc::new(scorer),
        Arc::new(classifier),
    );

    // Priority queue first, then secondaries, in configured order.
    let mut queues = Vec::new();
    queues.push(QueueManager::new(
        db_pool.clone(),
        config.priority_queue.clone(),
        config.max_concurrent_claims,
    ));
    for name in config.secondary_queue_names() {
        queues.push(QueueManager::new(
            db_pool.clone(),
            name,
            config.max_concurrent_claims,
        ));
    }

    // Cooperative shutdown: termination signals flip the token; it is
    // checked between loop iterations only, so in-flight tasks finish.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(listen_for_shutdown(shutdown_tx));

    let worker = Worker {
        pool: db_pool,
        pipeline,
        queues,
        caller_id: format!("worker-{}", Uuid::new_v4()),
        task_lock: Mutex::new(()),
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
        task_budget: Duration::from_secs(config.task_timeout_secs),
    };

    worker.run(shutdown_rx).await;

    tracing::info!("Worker stopped gracefully");
}

async fn listen_for_shutdown(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::warn!("Shutdown signal received, finishing current task");
    let _ = shutdown_tx.send(true);
}

struct Worker {
    pool: PgPool,
    pipeline: ClaimPipeline,
    queues: Vec<QueueManager>,
    caller_id: String,
    /// At most one task is processed at a time in this process.
    task_lock: Mutex<()>,
    poll_interval: Duration,
    reconcile_interval: Duration,
    task_budget: Duration,
}

impl Worker {
    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        // Startup reconciliation: recover jobs orphaned by a crashed worker.
        self.reconcile_all().await;
        let mut last_reconcile = Instant::now();

        tracing::info!(caller_id = %self.caller_id, "Worker ready, starting job processing loop");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if last_reconcile.elapsed() >= self.reconcile_interval {
                self.reconcile_all().await;
                last_reconcile = Instant::now();
            }

            match self.claim_next_job().await {
                Ok(Some((queue_index, job))) => {
                    self.process_claimed(queue_index, job).await;
                }
                Ok(None) => {
                    // No job available, sleep before next poll
                    tokio::select! {
                        _ = sleep(self.poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error claiming next job, backing off");
                    tokio::select! {
                        _ = sleep(Duration::from_secs(30)) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }
    }

    async fn reconcile_all(&self) {
        for queue in &self.queues {
            match queue.ensure_consistency_in_queue().await {
                Ok(0) => {}
                Ok(repaired) => {
                    tracing::warn!(queue = %queue.queue_name(), repaired, "Reconciled stale jobs");
                }
                Err(e) => {
                    tracing::error!(queue = %queue.queue_name(), error = %e, "Reconciliation failed");
                }
            }
        }
    }

    /// Claim from the priority queue first, then secondaries in order.
    async fn claim_next_job(
        &self,
    ) -> Result<Option<(usize, JobRecord)>, claim_verify::services::queue::QueueError> {
        for (index, queue) in self.queues.iter().enumerate() {
            if let Some(job) = queue.get_next_in_queue(&self.caller_id).await? {
                return Ok(Some((index, job)));
            }
        }
        Ok(None)
    }

    async fn process_claimed(&self, queue_index: usize, job: JobRecord) {
        // Serialize task execution within this process.
        let _guard = self.task_lock.lock().await;

        let queue = &self.queues[queue_index];
        let started = Instant::now();

        tracing::info!(
            task_id = %job.task_id,
            qid = %job.qid,
            queue = %queue.queue_name(),
            "Processing claim-check task"
        );

        // Mark the canonical record as processing before doing any work.
        let mut canonical = TaskStatusRecord {
            qid: job.qid.clone(),
            task_id: job.task_id,
            status: JobStatus::Processing,
            request_type: job.request_type.clone(),
            algo_version: job.algo_version.clone(),
            requested_at: job.requested_at,
            processing_started_at: job.processing_started_at,
            completed_at: None,
            last_updated: Utc::now(),
            error_message: None,
        };
        if let Err(e) = queries::upsert_task_status(&self.pool, &canonical).await {
            tracing::error!(task_id = %job.task_id, error = %e, "Failed to mark task processing");
            return;
        }

        // The whole task runs under a wall-clock budget so a hung external
        // call cannot stall the worker indefinitely.
        let outcome = timeout(
            self.task_budget,
            self.pipeline.process_task(&self.pool, &job),
        )
        .await;

        match outcome {
            Ok(Ok(stats)) => {
                canonical.status = JobStatus::Completed;
                canonical.completed_at = Some(Utc::now());

                if let Err(e) = queries::upsert_task_status(&self.pool, &canonical).await {
                    tracing::error!(task_id = %job.task_id, error = %e, "Failed to persist completed status");
                    return;
                }
                if let Err(e) = queries::update_job_status(
                    &self.pool,
                    job.id,
                    JobStatus::Completed,
                    canonical.processing_started_at,
                    canonical.completed_at,
                    None,
                )
                .await
                {
                    tracing::error!(task_id = %job.task_id, error = %e, "Failed to update queue job");
                }
                match queue.confirm_processing(&self.caller_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(task_id = %job.task_id, "Completed task failed consistency check");
                    }
                    Err(e) => {
                        tracing::error!(task_id = %job.task_id, error = %e, "Consistency confirmation failed");
                    }
                }

                metrics::counter!("verification_tasks_completed").increment(1);
                metrics::histogram!("verification_processing_seconds")
                    .record(started.elapsed().as_secs_f64());

                tracing::info!(
                    task_id = %job.task_id,
                    qid = %job.qid,
                    references = stats.reference_count,
                    evidence = stats.evidence_count,
                    duration_ms = stats.duration_ms,
                    "Task completed"
                );
            }
            Ok(Err(e)) => {
                self.record_task_error(&mut canonical, &job, &e.to_string())
                    .await;
            }
            Err(_) => {
                let message = format!(
                    "task exceeded wall-clock budget of {}s",
                    self.task_budget.as_secs()
                );
                self.record_task_error(&mut canonical, &job, &message).await;
            }
        }
    }

    /// Record a failed task. Errors are terminal: the task is not retried
    /// automatically, a human or a separate sweep must re-enqueue it.
    async fn record_task_error(
        &self,
        canonical: &mut TaskStatusRecord,
        job: &JobRecord,
        message: &str,
    ) {
        tracing::error!(task_id = %job.task_id, qid = %job.qid, error = %message, "Task processing failed");

        canonical.status = JobStatus::Error;
        canonical.error_message = Some(message.to_string());

        if let Err(e) = queries::upsert_task_status(&self.pool, canonical).await {
            tracing::error!(task_id = %job.task_id, error = %e, "Failed to persist error status");
        }
        if let Err(e) = queries::update_job_status(
            &self.pool,
            job.id,
            JobStatus::Error,
            canonical.processing_started_at,
            canonical.completed_at,
            Some(message),
        )
        .await
        {
            tracing::error!(task_id = %job.task_id, error = %e, "Failed to update queue job");
        }

        metrics::counter!("verification_tasks_failed").increment(1);
    }
}
