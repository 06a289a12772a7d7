//! Evaluation events.

use statewatch_stream::{EvaluationEvent, Event, EventPayload, Topic};

use crate::changes::ChangeSet;
use crate::decode::{decode, TrackedChange};
use crate::error::StateError;
use crate::events::EventDeriver;
use crate::read::ReadTxn;

/// Emits an `Evaluation` event for every evaluation written.
///
/// Filter keys are the job ID and, when set, the triggering deployment ID.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvaluationEventDeriver;

impl EventDeriver for EvaluationEventDeriver {
    fn topic(&self) -> Topic {
        Topic::Evaluation
    }

    fn derive(&self, _txn: &dyn ReadTxn, changes: &ChangeSet) -> Result<Vec<Event>, StateError> {
        let mut events = Vec::new();
        for change in &changes.changes {
            let Some(TrackedChange::Evaluation {
                after: Some(eval), ..
            }) = decode(change)?
            else {
                continue;
            };

            let filter_keys = std::iter::once(eval.job_id.clone())
                .chain(eval.deployment_id.iter().cloned());
            events.push(
                Event::new(
                    changes.msg_type.as_str(),
                    eval.id.clone(),
                    eval.namespace.clone(),
                    changes.index,
                    EventPayload::Evaluation(EvaluationEvent {
                        evaluation: eval.clone(),
                    }),
                )
                .with_filter_keys(filter_keys),
            );
        }
        Ok(events)
    }
}
