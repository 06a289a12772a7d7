//! Topic, event and payload types carried by the stream.

use serde::{Deserialize, Serialize};
use statewatch_types::{Deployment, Evaluation, Job};

/// Event topics.
///
/// [`Topic::All`] is the `*` pattern; it is only meaningful in subscribe
/// requests and is never attached to a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Deployment lifecycle changes, enriched with the owning job.
    Deployment,
    /// Job registrations, updates and deregistrations.
    Job,
    /// Evaluation creations and updates.
    Evaluation,
    /// Matches every topic.
    #[serde(rename = "*")]
    All,
}

impl Topic {
    /// Returns the canonical string label for this topic.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::Job => "Job",
            Self::Evaluation => "Evaluation",
            Self::All => "*",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Topic {
    type Err = ParseTopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deployment" => Ok(Self::Deployment),
            "Job" => Ok(Self::Job),
            "Evaluation" => Ok(Self::Evaluation),
            "*" => Ok(Self::All),
            _ => Err(ParseTopicError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown topic string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event topic: {0}")]
pub struct ParseTopicError(pub String);

/// Payload of a `Deployment` event.
///
/// `job` is the owning job as of the commit, whether or not the commit
/// touched it. `eval` is only the evaluation written by the same commit; it
/// is never looked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub deployment: Deployment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval: Option<Evaluation>,
}

/// Payload of a `Job` event. Deregistrations carry the job as it was
/// before the delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job: Job,
}

/// Payload of an `Evaluation` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationEvent {
    pub evaluation: Evaluation,
}

/// Structured payloads, one variant per topic.
///
/// Serialised untagged: the envelope's `topic` already says which variant
/// the payload is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Deployment(DeploymentEvent),
    Job(JobEvent),
    Evaluation(EvaluationEvent),
}

impl EventPayload {
    /// Returns the topic this payload belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            Self::Deployment(_) => Topic::Deployment,
            Self::Job(_) => Topic::Job,
            Self::Evaluation(_) => Topic::Evaluation,
        }
    }

    /// Returns the deployment payload, if this is one.
    pub fn as_deployment(&self) -> Option<&DeploymentEvent> {
        match self {
            Self::Deployment(event) => Some(event),
            _ => None,
        }
    }

    /// Returns the job payload, if this is one.
    pub fn as_job(&self) -> Option<&JobEvent> {
        match self {
            Self::Job(event) => Some(event),
            _ => None,
        }
    }

    /// Returns the evaluation payload, if this is one.
    pub fn as_evaluation(&self) -> Option<&EvaluationEvent> {
        match self {
            Self::Evaluation(event) => Some(event),
            _ => None,
        }
    }
}

/// A single derived event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Coarse category used for filtering.
    pub topic: Topic,
    /// The kind of write that produced the event (e.g. `DeploymentStatusUpdate`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// ID of the primary entity the event concerns.
    pub key: String,
    /// Namespace of the primary entity.
    pub namespace: String,
    /// Secondary keys a subscriber may filter on (e.g. the owning job ID).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_keys: Vec<String>,
    /// Commit index of the transaction that produced the event.
    pub index: u64,
    pub payload: EventPayload,
}

impl Event {
    /// Creates an event whose topic is taken from the payload.
    pub fn new(
        event_type: impl Into<String>,
        key: impl Into<String>,
        namespace: impl Into<String>,
        index: u64,
        payload: EventPayload,
    ) -> Self {
        Self {
            topic: payload.topic(),
            event_type: event_type.into(),
            key: key.into(),
            namespace: namespace.into(),
            filter_keys: Vec::new(),
            index,
            payload,
        }
    }

    /// Attaches secondary filter keys.
    pub fn with_filter_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// All events produced by one commit, sharing its index.
///
/// A batch is published and delivered as a unit; subscribers never observe
/// part of one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Events {
    pub index: u64,
    pub events: Vec<Event>,
}

impl Events {
    /// Creates an empty batch for the given commit index.
    pub fn new(index: u64) -> Self {
        Self {
            index,
            events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
