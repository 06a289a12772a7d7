//! Change records produced by committed transactions.

use statewatch_types::{Deployment, Evaluation, Job};

pub const TABLE_JOBS: &str = "jobs";
pub const TABLE_DEPLOYMENT: &str = "deployment";
pub const TABLE_EVALS: &str = "evals";

/// A stored entity, as captured in a change record.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Job(Job),
    Deployment(Deployment),
    Evaluation(Evaluation),
}

impl Entity {
    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Job(_) => "job",
            Self::Deployment(_) => "deployment",
            Self::Evaluation(_) => "evaluation",
        }
    }

    /// `(namespace, id)` of the entity.
    pub fn key(&self) -> (&str, &str) {
        match self {
            Self::Job(job) => (&job.namespace, &job.id),
            Self::Deployment(d) => (&d.namespace, &d.id),
            Self::Evaluation(e) => (&e.namespace, &e.id),
        }
    }

    pub fn as_job(&self) -> Option<&Job> {
        match self {
            Self::Job(job) => Some(job),
            _ => None,
        }
    }

    pub fn as_deployment(&self) -> Option<&Deployment> {
        match self {
            Self::Deployment(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_evaluation(&self) -> Option<&Evaluation> {
        match self {
            Self::Evaluation(e) => Some(e),
            _ => None,
        }
    }
}

/// One mutation of one row.
///
/// `before == None` is a create and `after == None` is a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub table: String,
    pub before: Option<Entity>,
    pub after: Option<Entity>,
}

impl Change {
    pub fn new(table: impl Into<String>, before: Option<Entity>, after: Option<Entity>) -> Self {
        Self {
            table: table.into(),
            before,
            after,
        }
    }

    /// `(namespace, id)` of the row this change touched.
    pub fn key(&self) -> Option<(&str, &str)> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(Entity::key)
    }

    pub fn is_delete(&self) -> bool {
        self.after.is_none()
    }
}

/// The kind of write that produced a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    JobRegister,
    JobDeregister,
    DeploymentUpsert,
    DeploymentDelete,
    DeploymentStatusUpdate,
    EvalUpdate,
}

impl MsgType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobRegister => "JobRegister",
            Self::JobDeregister => "JobDeregister",
            Self::DeploymentUpsert => "DeploymentUpsert",
            Self::DeploymentDelete => "DeploymentDelete",
            Self::DeploymentStatusUpdate => "DeploymentStatusUpdate",
            Self::EvalUpdate => "EvalUpdate",
        }
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every change made by one committed transaction, in write order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    /// Commit index of the transaction.
    pub index: u64,
    pub msg_type: MsgType,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(index: u64, msg_type: MsgType, changes: Vec<Change>) -> Self {
        Self {
            index,
            msg_type,
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
