//! Event derivation from change sets.

mod deployment;
mod evaluation;
mod job;
mod publisher;

#[cfg(test)]
pub(crate) mod testing;

use statewatch_stream::{Event, Topic};

use crate::changes::ChangeSet;
use crate::error::StateError;
use crate::read::ReadTxn;

pub use deployment::DeploymentEventDeriver;
pub use evaluation::EvaluationEventDeriver;
pub use job::JobEventDeriver;
pub use publisher::EventPublisher;

/// Turns one committed change set into events of one family.
///
/// Derivers are pure: they read through `txn` but never write, and return
/// an empty vector when the change set has nothing for their topic.
pub trait EventDeriver: Send + Sync {
    /// The topic of every event this deriver emits.
    fn topic(&self) -> Topic;

    /// Derives events for `changes`, all tagged with `changes.index`.
    ///
    /// # Errors
    ///
    /// `StateError::TypeMismatch` for malformed change records and
    /// `StateError::Lookup` when an enrichment read fails.
    fn derive(&self, txn: &dyn ReadTxn, changes: &ChangeSet) -> Result<Vec<Event>, StateError>;
}
