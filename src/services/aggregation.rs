use async_trait::async_trait;

use crate::models::verdict::{EntailmentLabel, EvidenceUnit, LabelProbs};
use crate::services::inference::ModelError;
use crate::services::selection::ScoredCandidate;

/// Entailment classification seam. The production implementation calls a
/// remote 3-class classifier; tests substitute deterministic classifiers.
#[async_trait]
pub trait EntailmentClassifier: Send + Sync {
    /// Classify each sentence against the claim. Must return one
    /// `[SUPPORTS, REFUTES, NOT_ENOUGH_INFO]` vector per sentence, in
    /// input order.
    async fn classify_batch(
        &self,
        claim: &str,
        sentences: &[String],
    ) -> Result<Vec<LabelProbs>, ModelError>;
}

/// Claim-level outcome for one (claim, reference) pair.
#[derive(Debug, Clone)]
pub struct ReferenceAssessment {
    pub evidence: Vec<EvidenceUnit>,
    pub weighted_label: EntailmentLabel,
    pub weighted_probs: LabelProbs,
    pub malon_label: EntailmentLabel,
    pub final_label: EntailmentLabel,
    pub final_sentence: Option<String>,
}

/// Combines per-unit entailment signals into claim-level verdicts under the
/// weighted-sum and Malon precedence policies.
pub struct EntailmentAggregator {
    score_threshold: f64,
    batch_size: usize,
}

impl EntailmentAggregator {
    pub fn new(score_threshold: f64, batch_size: usize) -> Self {
        Self {
            score_threshold,
            batch_size: batch_size.max(1),
        }
    }

    /// Classify the selected evidence and aggregate. Evidence units are
    /// consumed in selection order, which is descending relevance order.
    pub async fn assess(
        &self,
        classifier: &dyn EntailmentClassifier,
        claim: &str,
        selected: &[ScoredCandidate],
    ) -> Result<ReferenceAssessment, ModelError> {
        let mut evidence = Vec::with_capacity(selected.len());

        for batch in selected.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let probs = classifier.classify_batch(claim, &texts).await?;
            if probs.len() != batch.len() {
                return Err(ModelError::Response(format!(
                    "classifier returned {} vectors for a batch of {}",
                    probs.len(),
                    batch.len()
                )));
            }
            for (candidate, prob) in batch.iter().zip(probs) {
                evidence.push(EvidenceUnit {
                    sentence_text: candidate.text.clone(),
                    relevance_score: candidate.score,
                    coverage: candidate.coverage.clone(),
                    entailment_label: prob.label(),
                    entailment_probs: prob,
                });
            }
        }

        Ok(self.aggregate(evidence))
    }

    /// Pure aggregation over already-classified evidence.
    pub fn aggregate(&self, evidence: Vec<EvidenceUnit>) -> ReferenceAssessment {
        let (weighted_probs, weighted_label) = self.weighted_sum(&evidence);
        let malon_label = self.malon(&evidence);
        let (final_label, final_sentence) = final_verdict(&evidence);

        ReferenceAssessment {
            evidence,
            weighted_label,
            weighted_probs,
            malon_label,
            final_label,
            final_sentence,
        }
    }

    fn surviving<'a>(&self, evidence: &'a [EvidenceUnit]) -> impl Iterator<Item = &'a EvidenceUnit> {
        let threshold = self.score_threshold;
        evidence.iter().filter(move |u| u.relevance_score > threshold)
    }

    /// Weighted-sum policy: sum `probs * relevance_score` over units whose
    /// score exceeds the threshold. No surviving units means the claim is
    /// unverifiable from this reference: `NOT_ENOUGH_INFO` with a zero
    /// vector (not `REFUTES` — absence of evidence is not refutation).
    fn weighted_sum(&self, evidence: &[EvidenceUnit]) -> (LabelProbs, EntailmentLabel) {
        let mut sum = LabelProbs::ZERO;
        let mut any = false;
        for unit in self.surviving(evidence) {
            sum.add(&unit.entailment_probs.scaled(unit.relevance_score));
            any = true;
        }
        if !any {
            return (LabelProbs::ZERO, EntailmentLabel::NotEnoughInfo);
        }
        (sum, sum.label())
    }

    /// Malon precedence policy over the same surviving units: SUPPORTS is
    /// checked before REFUTES regardless of counts.
    fn malon(&self, evidence: &[EvidenceUnit]) -> EntailmentLabel {
        let mut saw_refutes = false;
        for unit in self.surviving(evidence) {
            match unit.entailment_label {
                EntailmentLabel::Supports => return EntailmentLabel::Supports,
                EntailmentLabel::Refutes => saw_refutes = true,
                EntailmentLabel::NotEnoughInfo => {}
            }
        }
        if saw_refutes {
            EntailmentLabel::Refutes
        } else {
            EntailmentLabel::NotEnoughInfo
        }
    }
}

/// Final verdict across all evidence units for one (claim, reference) pair:
/// any SUPPORTS unit wins outright with the first supporting sentence;
/// otherwise the modal label wins, ties broken by first-encountered label
/// in selection order.
fn final_verdict(evidence: &[EvidenceUnit]) -> (EntailmentLabel, Option<String>) {
    if let Some(unit) = evidence
        .iter()
        .find(|u| u.entailment_label == EntailmentLabel::Supports)
    {
        return (EntailmentLabel::Supports, Some(unit.sentence_text.clone()));
    }

    // Counts in first-encountered order.
    let mut counts: Vec<(EntailmentLabel, usize)> = Vec::new();
    for unit in evidence {
        match counts.iter_mut().find(|(l, _)| *l == unit.entailment_label) {
            Some(entry) => entry.1 += 1,
            None => counts.push((unit.entailment_label, 1)),
        }
    }

    let mut winner: Option<(EntailmentLabel, usize)> = None;
    for &(label, count) in &counts {
        let better = match winner {
            None => true,
            Some((_, best)) => count > best,
        };
        if better {
            winner = Some((label, count));
        }
    }

    match winner {
        Some((label, _)) => {
            let sentence = evidence
                .iter()
                .find(|u| u.entailment_label == label)
                .map(|u| u.sentence_text.clone());
            (label, sentence)
        }
        None => (EntailmentLabel::NotEnoughInfo, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::claim::Coverage;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TableClassifier {
        probs: HashMap<String, [f64; 3]>,
        calls: AtomicUsize,
    }

    impl TableClassifier {
        fn new(entries: &[(&str, [f64; 3])]) -> Self {
            Self {
                probs: entries
                    .iter()
                    .map(|(s, p)| (s.to_string(), *p))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EntailmentClassifier for TableClassifier {
        async fn classify_batch(
            &self,
            _claim: &str,
            sentences: &[String],
        ) -> Result<Vec<LabelProbs>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(sentences
                .iter()
                .map(|s| LabelProbs(self.probs.get(s).copied().unwrap_or([0.0, 0.0, 1.0])))
                .collect())
        }
    }

    fn unit(text: &str, score: f64, probs: [f64; 3], index: usize) -> EvidenceUnit {
        let probs = LabelProbs(probs);
        EvidenceUnit {
            sentence_text: text.to_string(),
            relevance_score: score,
            coverage: Coverage::single(index),
            entailment_label: probs.label(),
            entailment_probs: probs,
        }
    }

    #[test]
    fn malon_checks_supports_before_refutes() {
        // One SUPPORTS unit and one REFUTES unit, both above threshold.
        let aggregator = EntailmentAggregator::new(0.5, 16);
        let result = aggregator.aggregate(vec![
            unit("supports it.", 0.8, [0.7, 0.2, 0.1], 0),
            unit("refutes it.", 0.7, [0.1, 0.8, 0.1], 1),
        ]);
        assert_eq!(result.malon_label, EntailmentLabel::Supports);
    }

    #[test]
    fn weighted_sum_weights_probs_by_relevance() {
        let aggregator = EntailmentAggregator::new(0.5, 16);
        let result = aggregator.aggregate(vec![
            unit("supports it.", 0.8, [0.7, 0.2, 0.1], 0),
            unit("refutes it.", 0.7, [0.1, 0.8, 0.1], 1),
        ]);
        // 0.8*[0.7,0.2,0.1] + 0.7*[0.1,0.8,0.1] = [0.63, 0.72, 0.15]
        assert!((result.weighted_probs.0[0] - 0.63).abs() < 1e-9);
        assert!((result.weighted_probs.0[1] - 0.72).abs() < 1e-9);
        assert!((result.weighted_probs.0[2] - 0.15).abs() < 1e-9);
        assert_eq!(result.weighted_label, EntailmentLabel::Refutes);
    }

    #[test]
    fn all_below_threshold_yields_nei_and_zero_vector() {
        let aggregator = EntailmentAggregator::new(0.5, 16);
        let result = aggregator.aggregate(vec![
            unit("weak one.", 0.3, [0.9, 0.05, 0.05], 0),
            unit("weak two.", 0.5, [0.9, 0.05, 0.05], 1),
        ]);
        assert_eq!(result.weighted_label, EntailmentLabel::NotEnoughInfo);
        assert_eq!(result.weighted_probs, LabelProbs::ZERO);
        // Threshold is strict: a unit exactly at the threshold does not survive.
        assert_eq!(result.malon_label, EntailmentLabel::NotEnoughInfo);
    }

    #[test]
    fn final_verdict_prefers_first_supporting_sentence() {
        let aggregator = EntailmentAggregator::new(0.0, 16);
        let result = aggregator.aggregate(vec![
            unit("refutes it.", 0.9, [0.1, 0.8, 0.1], 0),
            unit("first support.", 0.8, [0.7, 0.2, 0.1], 1),
            unit("second support.", 0.7, [0.6, 0.3, 0.1], 2),
        ]);
        assert_eq!(result.final_label, EntailmentLabel::Supports);
        assert_eq!(result.final_sentence.as_deref(), Some("first support."));
    }

    #[test]
    fn final_verdict_falls_back_to_mode() {
        let aggregator = EntailmentAggregator::new(0.0, 16);
        let result = aggregator.aggregate(vec![
            unit("nei one.", 0.9, [0.1, 0.2, 0.7], 0),
            unit("refutes one.", 0.8, [0.1, 0.8, 0.1], 1),
            unit("refutes two.", 0.7, [0.2, 0.7, 0.1], 2),
        ]);
        assert_eq!(result.final_label, EntailmentLabel::Refutes);
        assert_eq!(result.final_sentence.as_deref(), Some("refutes one."));
    }

    #[test]
    fn final_verdict_mode_tie_takes_first_encountered() {
        let aggregator = EntailmentAggregator::new(0.0, 16);
        let result = aggregator.aggregate(vec![
            unit("nei one.", 0.9, [0.1, 0.2, 0.7], 0),
            unit("refutes one.", 0.8, [0.1, 0.8, 0.1], 1),
        ]);
        // One NEI, one REFUTES: NEI was encountered first in score order.
        assert_eq!(result.final_label, EntailmentLabel::NotEnoughInfo);
        assert_eq!(result.final_sentence.as_deref(), Some("nei one."));
    }

    #[test]
    fn empty_evidence_is_unverifiable() {
        let aggregator = EntailmentAggregator::new(0.5, 16);
        let result = aggregator.aggregate(Vec::new());
        assert_eq!(result.weighted_label, EntailmentLabel::NotEnoughInfo);
        assert_eq!(result.malon_label, EntailmentLabel::NotEnoughInfo);
        assert_eq!(result.final_label, EntailmentLabel::NotEnoughInfo);
        assert!(result.final_sentence.is_none());
    }

    #[tokio::test]
    async fn assess_classifies_in_batches_and_keeps_selection_order() {
        let classifier = TableClassifier::new(&[
            ("first.", [0.7, 0.2, 0.1]),
            ("second.", [0.1, 0.8, 0.1]),
            ("third.", [0.1, 0.1, 0.8]),
        ]);
        let selected: Vec<ScoredCandidate> = ["first.", "second.", "third."]
            .iter()
            .enumerate()
            .map(|(i, text)| ScoredCandidate {
                text: text.to_string(),
                score: 0.9 - 0.1 * i as f64,
                coverage: Coverage::single(i),
            })
            .collect();

        let aggregator = EntailmentAggregator::new(0.5, 2);
        let result = aggregator
            .assess(&classifier, "claim", &selected)
            .await
            .unwrap();

        // 3 units in batches of 2 → 2 calls.
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.evidence.len(), 3);
        assert_eq!(result.evidence[0].sentence_text, "first.");
        assert_eq!(result.evidence[0].entailment_label, EntailmentLabel::Supports);
        assert_eq!(result.evidence[1].entailment_label, EntailmentLabel::Refutes);
        assert!((result.evidence[1].relevance_score - 0.8).abs() < 1e-9);
        assert_eq!(result.malon_label, EntailmentLabel::Supports);
        assert_eq!(result.final_sentence.as_deref(), Some("first."));
    }

    #[test]
    fn aggregation_is_deterministic() {
        let aggregator = EntailmentAggregator::new(0.4, 16);
        let units = vec![
            unit("alpha.", 0.9, [0.3, 0.3, 0.4], 0),
            unit("beta.", 0.6, [0.5, 0.4, 0.1], 1),
            unit("gamma.", 0.5, [0.2, 0.5, 0.3], 2),
        ];
        let first = aggregator.aggregate(units.clone());
        let second = aggregator.aggregate(units);
        assert_eq!(first.weighted_label, second.weighted_label);
        assert_eq!(first.malon_label, second.malon_label);
        assert_eq!(first.final_label, second.final_label);
        assert_eq!(first.final_sentence, second.final_sentence);
        assert_eq!(first.weighted_probs, second.weighted_probs);
    }
}
