use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string for the shared job store
    pub database_url: String,

    /// Base URL of the sentence relevance scoring service
    pub relevance_url: String,

    /// Base URL of the textual entailment classification service
    pub entailment_url: String,

    /// Base URL of the claim extraction service (triples, labels, reference URLs)
    pub extractor_url: String,

    /// Queue claimed first by workers
    #[serde(default = "default_priority_queue")]
    pub priority_queue: String,

    /// Comma-separated queues claimed when the priority queue is empty
    #[serde(default = "default_secondary_queues")]
    pub secondary_queues: String,

    /// Algorithm version stamped on every task
    #[serde(default = "default_algo_version")]
    pub algo_version: String,

    /// Evidence units kept per (claim, reference) pair
    #[serde(default = "default_top_n")]
    pub evidence_top_n: usize,

    /// Sentences per relevance-scoring batch
    #[serde(default = "default_batch_size")]
    pub scoring_batch_size: usize,

    /// Relevance score a unit must exceed to count toward aggregation
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// Evidence sentences longer than this are clipped
    #[serde(default = "default_max_sentence_len")]
    pub max_sentence_len: usize,

    /// Maximum concurrent claim attempts against the store
    #[serde(default = "default_max_concurrent_claims")]
    pub max_concurrent_claims: usize,

    /// Worker poll interval when the queues are empty
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Interval between queue reconciliation passes
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Timeout for one reference page fetch
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Timeout for one inference service call
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Wall-clock budget for processing one task end to end
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_priority_queue() -> String {
    "user".to_string()
}

fn default_secondary_queues() -> String {
    "auto".to_string()
}

fn default_algo_version() -> String {
    "1.1.1".to_string()
}

fn default_top_n() -> usize {
    5
}

fn default_batch_size() -> usize {
    16
}

fn default_score_threshold() -> f64 {
    0.0
}

fn default_max_sentence_len() -> usize {
    1024
}

fn default_max_concurrent_claims() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_model_timeout_secs() -> u64 {
    60
}

fn default_task_timeout_secs() -> u64 {
    900
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Secondary queue names in claim order.
    pub fn secondary_queue_names(&self) -> Vec<String> {
        self.secondary_queues
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
