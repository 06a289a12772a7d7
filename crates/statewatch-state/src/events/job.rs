//! Job events: one per job written or deleted.

use statewatch_stream::{Event, EventPayload, JobEvent, Topic};

use crate::changes::ChangeSet;
use crate::decode::{decode, TrackedChange};
use crate::error::StateError;
use crate::events::EventDeriver;
use crate::read::ReadTxn;

/// Emits a `Job` event for every job change. Deletes report the job as it
/// was before the delete.
#[derive(Debug, Default, Clone, Copy)]
pub struct JobEventDeriver;

impl EventDeriver for JobEventDeriver {
    fn topic(&self) -> Topic {
        Topic::Job
    }

    fn derive(&self, _txn: &dyn ReadTxn, changes: &ChangeSet) -> Result<Vec<Event>, StateError> {
        let mut events = Vec::new();
        for change in &changes.changes {
            let Some(TrackedChange::Job { before, after }) = decode(change)? else {
                continue;
            };
            let Some(job) = after.or(before) else {
                continue;
            };
            events.push(Event::new(
                changes.msg_type.as_str(),
                job.id.clone(),
                job.namespace.clone(),
                changes.index,
                EventPayload::Job(JobEvent { job: job.clone() }),
            ));
        }
        Ok(events)
    }
}
