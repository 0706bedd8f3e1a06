use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::claim::Coverage;

/// Three-class entailment outcome for evidence against a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EntailmentLabel {
    Supports,
    Refutes,
    NotEnoughInfo,
}

/// Probability vector over `[SUPPORTS, REFUTES, NOT_ENOUGH_INFO]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelProbs(pub [f64; 3]);

impl LabelProbs {
    pub const ZERO: LabelProbs = LabelProbs([0.0; 3]);

    const LABELS: [EntailmentLabel; 3] = [
        EntailmentLabel::Supports,
        EntailmentLabel::Refutes,
        EntailmentLabel::NotEnoughInfo,
    ];

    /// Argmax label; the first index wins ties.
    pub fn label(&self) -> EntailmentLabel {
        let mut best = 0;
        for i in 1..3 {
            if self.0[i] > self.0[best] {
                best = i;
            }
        }
        Self::LABELS[best]
    }

    pub fn scaled(&self, weight: f64) -> LabelProbs {
        LabelProbs([self.0[0] * weight, self.0[1] * weight, self.0[2] * weight])
    }

    pub fn add(&mut self, other: &LabelProbs) {
        for i in 0..3 {
            self.0[i] += other.0[i];
        }
    }

    pub fn get(&self, label: EntailmentLabel) -> f64 {
        match label {
            EntailmentLabel::Supports => self.0[0],
            EntailmentLabel::Refutes => self.0[1],
            EntailmentLabel::NotEnoughInfo => self.0[2],
        }
    }
}

/// One selected sentence span, scored for relevance and classified for
/// entailment. Created once by the aggregator and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceUnit {
    pub sentence_text: String,
    pub relevance_score: f64,
    pub coverage: Coverage,
    pub entailment_label: EntailmentLabel,
    pub entailment_probs: LabelProbs,
}

/// Terminal output of processing one (claim, reference) pair. Insert-only:
/// a re-run produces new verdict records under a fresh task_id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub qid: String,
    pub task_id: Uuid,
    pub reference_id: String,
    pub weighted_label: EntailmentLabel,
    pub malon_label: EntailmentLabel,
    pub final_label: EntailmentLabel,
    pub final_sentence: Option<String>,
    pub label_probabilities: LabelProbs,
}

/// Fetch metadata persisted per (task, reference) before verdicts are drawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFetchRecord {
    pub task_id: Uuid,
    pub qid: String,
    pub reference_id: String,
    pub url: String,
    pub status_code: i32,
    pub error_message: Option<String>,
    pub sentence_count: i32,
    pub window_count: i32,
    pub fetched_at: DateTime<Utc>,
}

/// Per-task processing statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub task_id: Uuid,
    pub qid: String,
    pub claim_count: i32,
    pub reference_count: i32,
    pub fetched_ok_count: i32,
    pub evidence_count: i32,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_wire_form_is_screaming_snake() {
        assert_eq!(EntailmentLabel::Supports.to_string(), "SUPPORTS");
        assert_eq!(EntailmentLabel::NotEnoughInfo.to_string(), "NOT_ENOUGH_INFO");
        assert_eq!(
            "REFUTES".parse::<EntailmentLabel>().unwrap(),
            EntailmentLabel::Refutes
        );
    }

    #[test]
    fn argmax_first_index_wins_ties() {
        assert_eq!(LabelProbs([0.4, 0.4, 0.2]).label(), EntailmentLabel::Supports);
        assert_eq!(LabelProbs([0.1, 0.45, 0.45]).label(), EntailmentLabel::Refutes);
        assert_eq!(LabelProbs([0.0, 0.0, 0.0]).label(), EntailmentLabel::Supports);
    }

    #[test]
    fn scaled_and_add_compose() {
        let mut sum = LabelProbs::ZERO;
        sum.add(&LabelProbs([0.5, 0.3, 0.2]).scaled(0.8));
        sum.add(&LabelProbs([0.1, 0.7, 0.2]).scaled(0.5));
        assert!((sum.0[0] - 0.45).abs() < 1e-9);
        assert!((sum.0[1] - 0.59).abs() < 1e-9);
        assert!((sum.0[2] - 0.26).abs() < 1e-9);
    }
}
