use std::collections::BTreeSet;

use garde::Validate;
use serde::{Deserialize, Serialize};

fn is_qid(value: &str, _ctx: &()) -> garde::Result {
    let mut chars = value.chars();
    if chars.next() == Some('Q') && value.len() > 1 && chars.all(|c| c.is_ascii_digit()) {
        return Ok(());
    }
    Err(garde::Error::new("expected a Wikidata item id like Q64"))
}

fn is_pid(value: &str, _ctx: &()) -> garde::Result {
    let mut chars = value.chars();
    if chars.next() == Some('P') && value.len() > 1 && chars.all(|c| c.is_ascii_digit()) {
        return Ok(());
    }
    Err(garde::Error::new("expected a Wikidata property id like P36"))
}

fn is_http_url(value: &str, _ctx: &()) -> garde::Result {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(());
    }
    Err(garde::Error::new("expected an http(s) URL"))
}

/// Natural-language rendering of a subject-predicate-object triple.
/// Produced by the upstream extractor/verbaliser and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClaimUnit {
    #[garde(custom(is_qid))]
    pub qid: String,

    #[garde(custom(is_pid))]
    pub property_id: String,

    #[garde(length(min = 1, max = 64))]
    pub object_id: String,

    #[garde(length(min = 1, max = 512))]
    pub entity_label: String,

    #[garde(length(min = 1, max = 512))]
    pub property_label: String,

    #[garde(length(min = 1, max = 512))]
    pub object_label: String,

    #[garde(length(min = 1, max = 2048))]
    pub verbalised_text: String,
}

/// A cited web page for one claim.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClaimReference {
    #[garde(length(min = 1, max = 128))]
    pub reference_id: String,

    #[garde(custom(is_http_url))]
    pub url: String,
}

/// Sentence-position indices a candidate occupies in its source page.
///
/// Single-sentence candidates cover `{i}`; a sliding window of two
/// consecutive sentences covers `{i, i+1}`. Overlap filtering during
/// evidence selection relies on these explicit index sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage(BTreeSet<usize>);

impl Coverage {
    pub fn single(index: usize) -> Self {
        Coverage(BTreeSet::from([index]))
    }

    pub fn window(start: usize, size: usize) -> Self {
        Coverage((start..start + size).collect())
    }

    /// Coverage of a window that absorbed an entire short page.
    pub fn span(len: usize) -> Self {
        Coverage((0..len).collect())
    }

    pub fn is_disjoint(&self, other: &Coverage) -> bool {
        self.0.is_disjoint(&other.0)
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

/// A text span from a reference page, tagged with its coverage set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceCandidate {
    pub text: String,
    pub coverage: Coverage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_window_covers_consecutive_indices() {
        let w = Coverage::window(3, 2);
        assert_eq!(w.indices().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn coverage_disjointness() {
        let a = Coverage::single(1);
        let b = Coverage::window(1, 2);
        let c = Coverage::window(2, 2);
        assert!(!a.is_disjoint(&b));
        assert!(a.is_disjoint(&c));
        assert!(!b.is_disjoint(&c));
    }

    #[test]
    fn claim_unit_validation_rejects_malformed_qid() {
        let claim = ClaimUnit {
            qid: "X42".to_string(),
            property_id: "P36".to_string(),
            object_id: "Q64".to_string(),
            entity_label: "Germany".to_string(),
            property_label: "capital".to_string(),
            object_label: "Berlin".to_string(),
            verbalised_text: "The capital of Germany is Berlin.".to_string(),
        };
        assert!(claim.validate().is_err());

        let claim = ClaimUnit { qid: "Q64".to_string(), ..claim };
        assert!(claim.validate().is_ok());
    }

    #[test]
    fn reference_validation_requires_http_url() {
        let r = ClaimReference {
            reference_id: "ref-1".to_string(),
            url: "ftp://example.org".to_string(),
        };
        assert!(r.validate().is_err());
    }
}
