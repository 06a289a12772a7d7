//! Shared domain types for the statewatch workspace.
//!
//! This crate holds the entities that the state store persists and that
//! derived events carry: [`Job`], [`Deployment`] and [`Evaluation`], together
//! with their status enums and the namespace constants used to address them.
//!
//! Only the fields the event pipeline touches are modelled. Every entity is
//! addressed by a `(namespace, id)` pair; deployments and evaluations also
//! carry the ID of the job that owns them.

mod deployment;
mod evaluation;
mod job;

pub use deployment::{
    Deployment, DeploymentStatus, DeploymentStatusUpdate, DEPLOYMENT_STATUS_DESCRIPTION_FAILED_BY_USER,
    DEPLOYMENT_STATUS_DESCRIPTION_PAUSED, DEPLOYMENT_STATUS_DESCRIPTION_RESUMED,
    DEPLOYMENT_STATUS_DESCRIPTION_RUNNING,
};
pub use evaluation::{EvalStatus, Evaluation, EVAL_TRIGGER_DEPLOYMENT_WATCHER, EVAL_TRIGGER_JOB_REGISTER};
pub use job::{Job, JobStatus, JOB_TYPE_BATCH, JOB_TYPE_SERVICE};

/// The namespace used when a request does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Pattern that matches every namespace, topic or key.
pub const WILDCARD: &str = "*";

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    /// The kind of status being parsed (e.g. `deployment`).
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Generates a fresh random identifier for a new entity.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
