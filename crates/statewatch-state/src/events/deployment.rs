//! Deployment events.
//!
//! A change set that writes a deployment yields exactly one `Deployment`
//! event carrying the deployment, its job and, if the same transaction
//! wrote one, an evaluation. The job is always filled in: taken from the
//! change set when the transaction touched it, otherwise read from state.
//! The evaluation is only ever taken from the change set.

use statewatch_stream::{DeploymentEvent, Event, EventPayload, Topic};

use crate::changes::ChangeSet;
use crate::decode::{decode, TrackedChange};
use crate::error::StateError;
use crate::events::EventDeriver;
use crate::read::ReadTxn;

/// Emits one `Deployment` event per change set that writes a deployment.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeploymentEventDeriver;

impl EventDeriver for DeploymentEventDeriver {
    fn topic(&self) -> Topic {
        Topic::Deployment
    }

    fn derive(&self, txn: &dyn ReadTxn, changes: &ChangeSet) -> Result<Vec<Event>, StateError> {
        let mut deployment = None;
        let mut job = None;
        let mut eval = None;

        // Last write per table wins; deletes carry nothing to report.
        for change in &changes.changes {
            match decode(change)? {
                Some(TrackedChange::Deployment { after: Some(d), .. }) => deployment = Some(d),
                Some(TrackedChange::Job { after: Some(j), .. }) => job = Some(j),
                Some(TrackedChange::Evaluation { after: Some(e), .. }) => eval = Some(e),
                _ => {}
            }
        }

        let Some(deployment) = deployment else {
            return Ok(Vec::new());
        };

        let job = match job {
            Some(job) => Some(job.clone()),
            None => txn
                .job_by_id(&deployment.namespace, &deployment.job_id)
                .map_err(|source| StateError::Lookup {
                    entity: "job",
                    source: Box::new(source),
                })?,
        };

        let event = Event::new(
            changes.msg_type.as_str(),
            deployment.id.clone(),
            deployment.namespace.clone(),
            changes.index,
            EventPayload::Deployment(DeploymentEvent {
                deployment: deployment.clone(),
                job,
                eval: eval.cloned(),
            }),
        )
        .with_filter_keys([deployment.job_id.clone()]);

        Ok(vec![event])
    }
}
