//! Runs derivers over committed change sets and hands the results to the
//! broker.

use statewatch_stream::{EventBroker, Events};

use crate::changes::ChangeSet;
use crate::error::StateError;
use crate::events::{
    DeploymentEventDeriver, EvaluationEventDeriver, EventDeriver, JobEventDeriver,
};
use crate::read::ReadTxn;

/// Derives and publishes one event batch per commit.
///
/// Must be driven by a single writer, in commit order. Derivation is
/// all-or-nothing: if any deriver fails, no events are produced for the
/// change set and the error is returned to the committer.
pub struct EventPublisher {
    derivers: Vec<Box<dyn EventDeriver>>,
    broker: EventBroker,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics: Vec<_> = self.derivers.iter().map(|d| d.topic()).collect();
        f.debug_struct("EventPublisher")
            .field("derivers", &topics)
            .field("broker", &self.broker)
            .finish()
    }
}

impl EventPublisher {
    /// Creates a publisher with no derivers.
    pub fn new(broker: EventBroker) -> Self {
        Self {
            derivers: Vec::new(),
            broker,
        }
    }

    /// Creates a publisher with the deployment, job and evaluation derivers,
    /// in that order.
    pub fn with_default_derivers(broker: EventBroker) -> Self {
        let mut publisher = Self::new(broker);
        publisher.register(DeploymentEventDeriver);
        publisher.register(JobEventDeriver);
        publisher.register(EvaluationEventDeriver);
        publisher
    }

    /// Adds a deriver. Its events follow those of earlier derivers.
    pub fn register(&mut self, deriver: impl EventDeriver + 'static) {
        self.derivers.push(Box::new(deriver));
    }

    pub fn broker(&self) -> &EventBroker {
        &self.broker
    }

    /// Runs every deriver and concatenates their events.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Derive` naming the first deriver that failed.
    pub fn derive(&self, txn: &dyn ReadTxn, changes: &ChangeSet) -> Result<Events, StateError> {
        let mut batch = Events::new(changes.index);

        for deriver in &self.derivers {
            let topic = deriver.topic();
            let events = deriver.derive(txn, changes).map_err(|source| {
                tracing::error!(
                    index = changes.index,
                    msg_type = %changes.msg_type,
                    %topic,
                    error = %source,
                    "event derivation failed"
                );
                StateError::Derive {
                    topic,
                    source: Box::new(source),
                }
            })?;

            for mut event in events {
                event.index = changes.index;
                batch.events.push(event);
            }
        }

        tracing::trace!(
            index = changes.index,
            msg_type = %changes.msg_type,
            count = batch.len(),
            "derived events"
        );
        Ok(batch)
    }

    /// Hands a derived batch to the broker.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Stream` if the broker has stopped.
    pub fn publish(&self, events: Events) -> Result<(), StateError> {
        self.broker.publish(events)?;
        Ok(())
    }

    /// Derives and publishes in one step.
    ///
    /// # Errors
    ///
    /// As [`EventPublisher::derive`] and [`EventPublisher::publish`].
    pub fn publish_changes(&self, txn: &dyn ReadTxn, changes: &ChangeSet) -> Result<(), StateError> {
        let events = self.derive(txn, changes)?;
        self.publish(events)
    }
}
