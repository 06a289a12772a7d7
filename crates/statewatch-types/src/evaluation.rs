use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{generate_id, Job, ParseStatusError};

/// Trigger recorded when registering a job creates an evaluation.
pub const EVAL_TRIGGER_JOB_REGISTER: &str = "job-register";

/// Trigger recorded when the deployment watcher creates an evaluation.
pub const EVAL_TRIGGER_DEPLOYMENT_WATCHER: &str = "deployment-watcher";

/// Status of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalStatus {
    Blocked,
    Pending,
    Complete,
    Failed,
    Canceled,
}

impl EvalStatus {
    /// Returns the canonical string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvalStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocked" => Ok(Self::Blocked),
            "pending" => Ok(Self::Pending),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(ParseStatusError {
                kind: "evaluation",
                value: s.to_string(),
            }),
        }
    }
}

/// A request for the scheduler to reconcile a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Unique evaluation identifier.
    pub id: String,
    /// Namespace of the job being evaluated.
    pub namespace: String,
    /// Inherited from the job.
    pub priority: i32,
    /// Scheduler type, inherited from the job.
    pub eval_type: String,
    /// What caused the evaluation (`job-register`, `deployment-watcher`, ...).
    pub triggered_by: String,
    /// ID of the job being evaluated.
    pub job_id: String,
    /// Deployment that caused the evaluation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    /// Current status.
    pub status: EvalStatus,
    /// Human-readable explanation of the status.
    #[serde(default)]
    pub status_description: String,
    /// Commit index at which the evaluation was created.
    pub create_index: u64,
    /// Commit index of the last write to the evaluation.
    pub modify_index: u64,
    /// Wall-clock creation time.
    pub create_time: DateTime<Utc>,
}

impl Evaluation {
    /// Creates a pending evaluation for the job.
    pub fn new(job: &Job, triggered_by: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            namespace: job.namespace.clone(),
            priority: job.priority,
            eval_type: job.job_type.clone(),
            triggered_by: triggered_by.into(),
            job_id: job.id.clone(),
            deployment_id: None,
            status: EvalStatus::Pending,
            status_description: String::new(),
            create_index: 0,
            modify_index: 0,
            create_time: Utc::now(),
        }
    }
}
