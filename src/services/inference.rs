use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::verdict::LabelProbs;
use crate::services::aggregation::EntailmentClassifier;
use crate::services::selection::RelevanceScorer;

/// Errors from the remote inference services.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference response malformed: {0}")]
    Response(String),
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    claim: &'a str,
    sentences: &'a [String],
}

#[derive(Deserialize)]
struct ScoreResponse {
    scores: Vec<f64>,
}

/// Client for the sentence relevance scoring service.
pub struct RelevanceClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelevanceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RelevanceScorer for RelevanceClient {
    async fn score_batch(&self, claim: &str, sentences: &[String]) -> Result<Vec<f64>, ModelError> {
        let url = format!("{}/score", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&ScoreRequest { claim, sentences })
            .send()
            .await?
            .error_for_status()?;

        let parsed: ScoreResponse = response.json().await?;
        if parsed.scores.len() != sentences.len() {
            return Err(ModelError::Response(format!(
                "expected {} scores, got {}",
                sentences.len(),
                parsed.scores.len()
            )));
        }
        Ok(parsed.scores)
    }
}

#[derive(Deserialize)]
struct ClassifyResponse {
    probabilities: Vec<[f64; 3]>,
}

/// Client for the 3-class textual entailment service. Probability vectors
/// come back in `[SUPPORTS, REFUTES, NOT_ENOUGH_INFO]` order.
pub struct EntailmentServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl EntailmentServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EntailmentClassifier for EntailmentServiceClient {
    async fn classify_batch(
        &self,
        claim: &str,
        sentences: &[String],
    ) -> Result<Vec<LabelProbs>, ModelError> {
        let url = format!("{}/classify", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&ScoreRequest { claim, sentences })
            .send()
            .await?
            .error_for_status()?;

        let parsed: ClassifyResponse = response.json().await?;
        if parsed.probabilities.len() != sentences.len() {
            return Err(ModelError::Response(format!(
                "expected {} probability vectors, got {}",
                sentences.len(),
                parsed.probabilities.len()
            )));
        }
        Ok(parsed.probabilities.into_iter().map(LabelProbs).collect())
    }
}
