use crate::models::claim::{Coverage, SentenceCandidate};

/// Size of the sliding window used for the second candidate sequence.
pub const WINDOW_SIZE: usize = 2;

/// Minimum characters for a span to count as a sentence. Shorter fragments
/// are almost always navigation crumbs or list markers.
const MIN_SENTENCE_LEN: usize = 3;

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "no", "vs", "etc", "e.g", "i.e", "cf",
    "approx", "fig", "vol",
];

/// Split cleaned page text into sentences.
///
/// Rule-based: a sentence ends at `.`, `!` or `?` followed by whitespace,
/// unless the terminator closes a known abbreviation or a single initial.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let boundary = match chars.peek() {
                Some(next) => next.is_whitespace() && !ends_with_abbreviation(&current),
                None => true,
            };
            if boundary {
                push_sentence(&mut sentences, &mut current);
            }
        }
    }
    push_sentence(&mut sentences, &mut current);

    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if trimmed.chars().count() >= MIN_SENTENCE_LEN
        && trimmed.chars().any(|c| c.is_alphanumeric())
    {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

fn ends_with_abbreviation(current: &str) -> bool {
    let trimmed = current.trim_end_matches('.');
    let last_word = trimmed
        .rsplit(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("");

    // Single initials like "J." in "J. Smith".
    if last_word.chars().count() == 1 && last_word.chars().all(|c| c.is_uppercase()) {
        return true;
    }

    ABBREVIATIONS
        .iter()
        .any(|a| last_word.eq_ignore_ascii_case(a))
}

/// Single-sentence candidates: candidate `i` covers position `{i}`.
pub fn sentence_candidates(sentences: &[String]) -> Vec<SentenceCandidate> {
    sentences
        .iter()
        .enumerate()
        .map(|(i, s)| SentenceCandidate {
            text: s.clone(),
            coverage: Coverage::single(i),
        })
        .collect()
}

/// Sliding-window candidates of [`WINDOW_SIZE`] consecutive sentences,
/// stride 1: candidate `i` covers `{i, i+1}`. A page shorter than the window
/// yields one candidate covering the whole page.
pub fn window_candidates(sentences: &[String]) -> Vec<SentenceCandidate> {
    if sentences.is_empty() {
        return Vec::new();
    }
    if sentences.len() < WINDOW_SIZE {
        return vec![SentenceCandidate {
            text: sentences.join(" "),
            coverage: Coverage::span(sentences.len()),
        }];
    }

    sentences
        .windows(WINDOW_SIZE)
        .enumerate()
        .map(|(i, w)| SentenceCandidate {
            text: w.join(" "),
            coverage: Coverage::window(i, WINDOW_SIZE),
        })
        .collect()
}
