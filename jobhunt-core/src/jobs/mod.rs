mod store;

pub use store::{
    JobAttempt, JobFilter, JobStoreError, JobStoreResult, SqliteJobStore, SqliteJobStoreBuilder,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Routing state of a posting inside the queue store. `InProgress` marks a
/// claimed row; every other state is a settled routing outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Applied,
    Failed,
    Manual,
    Skipped,
    External,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Applied => "applied",
            JobStatus::Failed => "failed",
            JobStatus::Manual => "manual",
            JobStatus::Skipped => "skipped",
            JobStatus::External => "external",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = JobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            "manual" => Ok(Self::Manual),
            "skipped" => Ok(Self::Skipped),
            "external" => Ok(Self::External),
            other => Err(JobStoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// Scorer verdict. The model is allowed to waffle; the caller is not: any
/// answer that is not an unambiguous yes normalizes to `No`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Yes,
    No,
}

impl Recommendation {
    /// Normalizes a raw model answer. "MAYBE" and anything unrecognized
    /// collapse to `No`.
    pub fn from_model_answer(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "YES" => Recommendation::Yes,
            _ => Recommendation::No,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Yes => "YES",
            Recommendation::No => "NO",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed-shape scorer output, one per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u8,
    pub recommendation: Recommendation,
    pub reason: String,
}

/// A posting as produced by a job source, before it enters the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPosting {
    pub title: String,
    pub company: String,
    pub url: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub salary: Option<String>,
}

/// A stored posting with its routing state and attempt history counters.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: i64,
    pub job_id: String,
    pub url: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub remote: bool,
    pub salary: Option<String>,
    pub status: JobStatus,
    pub score: Option<u8>,
    pub recommendation: Option<Recommendation>,
    pub score_reason: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fresh identifier for a posting entering the store.
pub fn new_job_id() -> String {
    format!("job-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maybe_normalizes_to_no() {
        assert_eq!(
            Recommendation::from_model_answer("MAYBE"),
            Recommendation::No
        );
        assert_eq!(
            Recommendation::from_model_answer("maybe"),
            Recommendation::No
        );
        assert_eq!(Recommendation::from_model_answer(" yes "), Recommendation::Yes);
        assert_eq!(
            Recommendation::from_model_answer("strong yes"),
            Recommendation::No
        );
    }

    #[test]
    fn status_round_trips() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Applied,
            JobStatus::Failed,
            JobStatus::Manual,
            JobStatus::Skipped,
            JobStatus::External,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("unknown".parse::<JobStatus>().is_err());
    }
}
