use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;

use crate::db::queries::{self, StoreError};
use crate::models::job::JobRecord;
use crate::models::verdict::{PageFetchRecord, ProcessingStats, Verdict};
use crate::services::aggregation::{EntailmentAggregator, EntailmentClassifier};
use crate::services::extractor::{ExtractorClient, ExtractorError};
use crate::services::fetch::PageFetcher;
use crate::services::inference::ModelError;
use crate::services::segment;
use crate::services::selection::{EvidenceSelector, RelevanceScorer};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extractor(#[from] ExtractorError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Executes the verification pipeline for one claimed task: extract claims,
/// fetch cited pages, select evidence, aggregate entailment, persist.
pub struct ClaimPipeline {
    extractor: ExtractorClient,
    fetcher: PageFetcher,
    selector: EvidenceSelector,
    aggregator: EntailmentAggregator,
    scorer: Arc<dyn RelevanceScorer>,
    classifier: Arc<dyn EntailmentClassifier>,
}

impl ClaimPipeline {
    pub fn new(
        extractor: ExtractorClient,
        fetcher: PageFetcher,
        selector: EvidenceSelector,
        aggregator: EntailmentAggregator,
        scorer: Arc<dyn RelevanceScorer>,
        classifier: Arc<dyn EntailmentClassifier>,
    ) -> Self {
        Self {
            extractor,
            fetcher,
            selector,
            aggregator,
            scorer,
            classifier,
        }
    }

    /// Process one claimed job end to end. Every intermediate artifact is
    /// persisted before the caller flips the task to `completed`.
    /// Unfetchable or empty pages degrade to zero evidence; any other
    /// failure aborts the task and surfaces as a pipeline error.
    pub async fn process_task(
        &self,
        pool: &PgPool,
        job: &JobRecord,
    ) -> Result<ProcessingStats, PipelineError> {
        let started = Instant::now();
        let claims = self.extractor.claims_for_entity(&job.qid).await?;

        tracing::info!(
            task_id = %job.task_id,
            qid = %job.qid,
            claim_count = claims.len(),
            "Extracted claims for entity"
        );

        let mut reference_count = 0;
        let mut fetched_ok_count = 0;
        let mut evidence_count = 0;

        for extracted in &claims {
            let claim_text = &extracted.claim.verbalised_text;

            for reference in &extracted.references {
                reference_count += 1;

                let page = self.fetcher.fetch(&reference.url).await;
                let (singles, windows) = match page.text.as_deref() {
                    Some(text) => {
                        fetched_ok_count += 1;
                        let sentences = segment::split_sentences(text);
                        (
                            segment::sentence_candidates(&sentences),
                            segment::window_candidates(&sentences),
                        )
                    }
                    None => (Vec::new(), Vec::new()),
                };

                queries::upsert_page_fetch(
                    pool,
                    &PageFetchRecord {
                        task_id: job.task_id,
                        qid: job.qid.clone(),
                        reference_id: reference.reference_id.clone(),
                        url: reference.url.clone(),
                        status_code: page.status_code,
                        error_message: page.error_message.clone(),
                        sentence_count: singles.len() as i32,
                        window_count: windows.len() as i32,
                        fetched_at: page.fetched_at,
                    },
                )
                .await?;

                let selected = self
                    .selector
                    .select(self.scorer.as_ref(), claim_text, &singles, &windows)
                    .await?;

                let assessment = self
                    .aggregator
                    .assess(self.classifier.as_ref(), claim_text, &selected)
                    .await?;
                evidence_count += assessment.evidence.len();

                tracing::debug!(
                    task_id = %job.task_id,
                    reference_id = %reference.reference_id,
                    evidence = assessment.evidence.len(),
                    final_label = %assessment.final_label,
                    "Reference assessed"
                );

                queries::insert_verdict(
                    pool,
                    &Verdict {
                        qid: job.qid.clone(),
                        task_id: job.task_id,
                        reference_id: reference.reference_id.clone(),
                        weighted_label: assessment.weighted_label,
                        malon_label: assessment.malon_label,
                        final_label: assessment.final_label,
                        final_sentence: assessment.final_sentence.clone(),
                        label_probabilities: assessment.weighted_probs,
                    },
                )
                .await?;
            }
        }

        let stats = ProcessingStats {
            task_id: job.task_id,
            qid: job.qid.clone(),
            claim_count: claims.len() as i32,
            reference_count,
            fetched_ok_count,
            evidence_count: evidence_count as i32,
            duration_ms: started.elapsed().as_millis() as i64,
        };
        queries::upsert_processing_stats(pool, &stats).await?;

        Ok(stats)
    }
}
