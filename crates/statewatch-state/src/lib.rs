//! Committed state, change tracking and event derivation.
//!
//! Every write goes through [`StateStore::commit`], which runs the caller's
//! mutations inside one SQLite transaction, records a [`Change`] for every
//! entity touched, and assigns the transaction the next commit index. The
//! resulting [`ChangeSet`] is handed to the [`EventPublisher`], whose
//! [`EventDeriver`]s turn it into domain events for the broker.
//!
//! Derivation happens before the SQLite commit, against the transaction's
//! own view of the data. If a deriver fails the whole transaction is rolled
//! back, so a commit index is either committed together with its events or
//! not used at all.

mod changes;
mod decode;
mod error;
pub mod events;
mod read;
mod store;

pub use changes::{Change, ChangeSet, Entity, MsgType, TABLE_DEPLOYMENT, TABLE_EVALS, TABLE_JOBS};
pub use decode::{decode, TrackedChange};
pub use error::StateError;
pub use events::{
    DeploymentEventDeriver, EvaluationEventDeriver, EventDeriver, EventPublisher,
    JobEventDeriver,
};
pub use read::{deployments_by_job, evals_by_job, ReadTxn};
pub use store::{DeploymentStatusUpdateRequest, StateStore, WriteTxn};
