use async_trait::async_trait;

use crate::models::claim::{Coverage, SentenceCandidate};
use crate::services::inference::ModelError;

/// Relevance scoring seam. The production implementation calls a remote
/// cross-encoder service; tests substitute deterministic scorers.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Score each sentence against the claim. Must return one score per
    /// input sentence, in input order.
    async fn score_batch(&self, claim: &str, sentences: &[String]) -> Result<Vec<f64>, ModelError>;
}

/// A candidate that survived relevance scoring.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub text: String,
    pub score: f64,
    pub coverage: Coverage,
}

/// Selects a bounded, non-overlapping, relevance-ranked evidence set from
/// the two candidate segmentations of one reference page.
pub struct EvidenceSelector {
    top_n: usize,
    batch_size: usize,
    max_sentence_len: usize,
}

impl EvidenceSelector {
    pub fn new(top_n: usize, batch_size: usize, max_sentence_len: usize) -> Self {
        Self {
            top_n,
            batch_size: batch_size.max(1),
            max_sentence_len,
        }
    }

    /// Run the selection algorithm:
    ///
    /// 1. score both sequences independently, in fixed-size batches;
    /// 2. take the top N of each, ties broken by original order;
    /// 3. merge and sort descending by score;
    /// 4. greedily accept candidates whose coverage set is disjoint from
    ///    everything accepted so far;
    /// 5. truncate to N.
    pub async fn select(
        &self,
        scorer: &dyn RelevanceScorer,
        claim: &str,
        singles: &[SentenceCandidate],
        windows: &[SentenceCandidate],
    ) -> Result<Vec<ScoredCandidate>, ModelError> {
        let top_singles = self.top_n(self.score_sequence(scorer, claim, singles).await?);
        let top_windows = self.top_n(self.score_sequence(scorer, claim, windows).await?);

        let mut merged = top_singles;
        merged.extend(top_windows);
        // Stable: equal scores keep single-sentence candidates ahead of windows.
        merged.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut accepted: Vec<ScoredCandidate> = Vec::new();
        for candidate in merged {
            if accepted.len() == self.top_n {
                break;
            }
            if accepted
                .iter()
                .all(|a| a.coverage.is_disjoint(&candidate.coverage))
            {
                accepted.push(candidate);
            }
        }

        Ok(accepted)
    }

    async fn score_sequence(
        &self,
        scorer: &dyn RelevanceScorer,
        claim: &str,
        candidates: &[SentenceCandidate],
    ) -> Result<Vec<ScoredCandidate>, ModelError> {
        let mut scored = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let scores = scorer.score_batch(claim, &texts).await?;
            if scores.len() != batch.len() {
                return Err(ModelError::Response(format!(
                    "scorer returned {} scores for a batch of {}",
                    scores.len(),
                    batch.len()
                )));
            }
            for (candidate, score) in batch.iter().zip(scores) {
                scored.push(ScoredCandidate {
                    text: clip_sentence(&candidate.text, self.max_sentence_len),
                    score,
                    coverage: candidate.coverage.clone(),
                });
            }
        }
        Ok(scored)
    }

    fn top_n(&self, mut scored: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
        // sort_by is stable, so the first occurrence wins ties.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(self.top_n);
        scored
    }
}

fn clip_sentence(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_len).collect();
    clipped.push_str("...");
    clipped
}
