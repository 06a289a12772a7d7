use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ParseStatusError;

/// Job type for long-running services.
pub const JOB_TYPE_SERVICE: &str = "service";

/// Job type for run-to-completion batch work.
pub const JOB_TYPE_BATCH: &str = "batch";

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Registered but not yet placed.
    Pending,
    /// At least one allocation is running.
    Running,
    /// Stopped or completed.
    Dead,
}

impl JobStatus {
    /// Returns the canonical string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Dead => "dead",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "dead" => Ok(Self::Dead),
            _ => Err(ParseStatusError {
                kind: "job",
                value: s.to_string(),
            }),
        }
    }
}

/// A registered job.
///
/// Jobs are keyed by `(namespace, id)`. The store maintains `version`,
/// `create_index` and `modify_index`; callers only fill in the descriptive fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier, unique within its namespace.
    pub id: String,
    /// Namespace the job lives in.
    pub namespace: String,
    /// Human-readable name.
    pub name: String,
    /// Scheduler type (`service`, `batch`, ...).
    pub job_type: String,
    /// Scheduling priority, 1..=100.
    pub priority: i32,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Set when the job was stopped by its operator.
    #[serde(default)]
    pub stop: bool,
    /// Monotonic job version, bumped on every update.
    pub version: u64,
    /// Whether this version has been marked stable by a successful deployment.
    #[serde(default)]
    pub stable: bool,
    /// Commit index at which the job was created.
    pub create_index: u64,
    /// Commit index of the last write to the job.
    pub modify_index: u64,
    /// When the current version was submitted.
    pub submit_time: DateTime<Utc>,
}

impl Job {
    /// Creates a pending service job whose ID is its name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            namespace: namespace.into(),
            name,
            job_type: JOB_TYPE_SERVICE.to_string(),
            priority: 50,
            status: JobStatus::Pending,
            stop: false,
            version: 0,
            stable: false,
            create_index: 0,
            modify_index: 0,
            submit_time: Utc::now(),
        }
    }
}
