use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a claim-check task, shared between queue job records and the
/// canonical status record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    InQueue,
    Processing,
    Completed,
    Error,
    Failed,
}

impl JobStatus {
    /// Statuses for which `processing_started_at` must be set.
    pub fn is_started(self) -> bool {
        matches!(self, JobStatus::Processing | JobStatus::Completed | JobStatus::Error)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error | JobStatus::Failed)
    }
}

/// A queue's working copy of a claim-check task. One record per queue; the
/// canonical outcome lives in [`TaskStatusRecord`] and this copy may lag it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub qid: String,
    pub task_id: Uuid,
    pub queue: String,
    pub status: JobStatus,
    pub request_type: String,
    pub algo_version: String,
    pub requested_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub retry_count: i32,
    pub error_message: Option<String>,
}

/// The authoritative outcome of a task, keyed by `(task_id, qid)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    pub qid: String,
    pub task_id: Uuid,
    pub status: JobStatus,
    pub request_type: String,
    pub algo_version: String,
    pub requested_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_store_encoding() {
        for status in [
            JobStatus::InQueue,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Error,
            JobStatus::Failed,
        ] {
            let encoded = status.to_string();
            assert_eq!(encoded.parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!("in_queue".parse::<JobStatus>().unwrap(), JobStatus::InQueue);
    }

    #[test]
    fn started_statuses_match_timestamp_invariant() {
        assert!(JobStatus::Processing.is_started());
        assert!(JobStatus::Completed.is_started());
        assert!(JobStatus::Error.is_started());
        assert!(!JobStatus::InQueue.is_started());
        assert!(!JobStatus::Failed.is_started());
    }
}
