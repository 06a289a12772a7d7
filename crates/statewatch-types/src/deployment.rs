use serde::{Deserialize, Serialize};

use crate::{generate_id, Job, ParseStatusError};

/// Description set on a freshly created deployment.
pub const DEPLOYMENT_STATUS_DESCRIPTION_RUNNING: &str = "Deployment is running";

/// Description set when an operator pauses a deployment.
pub const DEPLOYMENT_STATUS_DESCRIPTION_PAUSED: &str = "Deployment is paused";

/// Description set when an operator resumes a paused deployment.
pub const DEPLOYMENT_STATUS_DESCRIPTION_RESUMED: &str = "Deployment is running";

/// Description set when an operator fails a deployment.
pub const DEPLOYMENT_STATUS_DESCRIPTION_FAILED_BY_USER: &str = "Deployment marked as failed";

/// Status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Running,
    Paused,
    Failed,
    Successful,
    Cancelled,
    Pending,
    Blocked,
    Unblocking,
}

impl DeploymentStatus {
    /// Returns the canonical string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Successful => "successful",
            Self::Cancelled => "cancelled",
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::Unblocking => "unblocking",
        }
    }

    /// Whether a deployment in this status can still make progress.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Running | Self::Paused | Self::Pending | Self::Blocked | Self::Unblocking
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            "successful" => Ok(Self::Successful),
            "cancelled" => Ok(Self::Cancelled),
            "pending" => Ok(Self::Pending),
            "blocked" => Ok(Self::Blocked),
            "unblocking" => Ok(Self::Unblocking),
            _ => Err(ParseStatusError {
                kind: "deployment",
                value: s.to_string(),
            }),
        }
    }
}

/// A rollout of one version of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment identifier.
    pub id: String,
    /// Namespace of the owning job.
    pub namespace: String,
    /// ID of the owning job.
    pub job_id: String,
    /// Job version being rolled out.
    pub job_version: u64,
    /// Job modify index at the time the deployment was created.
    pub job_modify_index: u64,
    /// Job create index, used to tell apart jobs re-registered under one ID.
    pub job_create_index: u64,
    /// Current status.
    pub status: DeploymentStatus,
    /// Human-readable explanation of the status.
    pub status_description: String,
    /// Commit index at which the deployment was created.
    pub create_index: u64,
    /// Commit index of the last write to the deployment.
    pub modify_index: u64,
}

impl Deployment {
    /// Creates a running deployment for the job's current version.
    pub fn new(job: &Job) -> Self {
        Self {
            id: generate_id(),
            namespace: job.namespace.clone(),
            job_id: job.id.clone(),
            job_version: job.version,
            job_modify_index: job.modify_index,
            job_create_index: job.create_index,
            status: DeploymentStatus::Running,
            status_description: DEPLOYMENT_STATUS_DESCRIPTION_RUNNING.to_string(),
            create_index: 0,
            modify_index: 0,
        }
    }
}

/// A request to move a deployment to a new status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatusUpdate {
    /// The deployment to update.
    pub deployment_id: String,
    /// The new status.
    pub status: DeploymentStatus,
    /// Explanation recorded alongside the status.
    pub status_description: String,
}
