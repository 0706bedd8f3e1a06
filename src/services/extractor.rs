use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

use crate::models::claim::{ClaimReference, ClaimUnit};

/// A claim unit together with the references cited for it.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedClaim {
    #[serde(flatten)]
    pub claim: ClaimUnit,
    pub references: Vec<ClaimReference>,
}

#[derive(Deserialize)]
struct EntityClaimsResponse {
    claims: Vec<ExtractedClaim>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("extractor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("extractor returned an invalid claim for {qid}: {report}")]
    Invalid { qid: String, report: String },
}

/// Client for the claim extraction service. The service owns Wikidata
/// parsing, property filtering, and verbalisation; this core consumes its
/// output as ready-made claim units with reference URLs.
pub struct ExtractorClient {
    http: reqwest::Client,
    base_url: String,
}

impl ExtractorClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExtractorError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// All referenced claims for one entity, validated at this boundary.
    pub async fn claims_for_entity(&self, qid: &str) -> Result<Vec<ExtractedClaim>, ExtractorError> {
        let url = format!("{}/entity/{}/claims", self.base_url, qid);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let parsed: EntityClaimsResponse = response.json().await?;

        for extracted in &parsed.claims {
            extracted
                .claim
                .validate()
                .map_err(|report| ExtractorError::Invalid {
                    qid: qid.to_string(),
                    report: report.to_string(),
                })?;
            for reference in &extracted.references {
                reference
                    .validate()
                    .map_err(|report| ExtractorError::Invalid {
                        qid: qid.to_string(),
                        report: report.to_string(),
                    })?;
            }
        }

        Ok(parsed.claims)
    }
}
