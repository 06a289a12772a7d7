//! Subscribe requests and topic/key filtering.

use std::collections::{HashMap, HashSet};

use statewatch_types::WILDCARD;

use crate::event::{Event, Events, Topic};

/// What a subscriber wants to receive and where to start.
///
/// A request with no topics matches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Topic pattern to key patterns. `Topic::All` and `"*"` are wildcards.
    pub topics: HashMap<Topic, HashSet<String>>,
    /// Namespace pattern; `"*"` matches every namespace.
    pub namespace: String,
    /// First commit index eligible for delivery.
    pub index: u64,
    /// Fail instead of silently skipping history that is no longer buffered.
    pub start_exactly_at_index: bool,
}

impl SubscribeRequest {
    /// Creates a request starting at `index` with no topics.
    pub fn new(index: u64) -> Self {
        Self {
            topics: HashMap::new(),
            namespace: WILDCARD.to_string(),
            index,
            start_exactly_at_index: false,
        }
    }

    /// Creates a request for every topic and key starting at `index`.
    pub fn all(index: u64) -> Self {
        Self::new(index).topic(Topic::All, [WILDCARD])
    }

    /// Adds key patterns for a topic.
    pub fn topic<I, S>(mut self, topic: Topic, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics
            .entry(topic)
            .or_default()
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Restricts the request to one namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Requires the requested index to still be replayable.
    pub fn start_exactly_at_index(mut self, exact: bool) -> Self {
        self.start_exactly_at_index = exact;
        self
    }

    pub(crate) fn filter(&self) -> EventFilter {
        EventFilter {
            topics: self.topics.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// The matching half of a [`SubscribeRequest`], owned by one subscription.
#[derive(Debug, Clone)]
pub(crate) struct EventFilter {
    topics: HashMap<Topic, HashSet<String>>,
    namespace: String,
}

impl EventFilter {
    pub(crate) fn matches(&self, event: &Event) -> bool {
        if self.namespace != WILDCARD && self.namespace != event.namespace {
            return false;
        }

        [event.topic, Topic::All]
            .iter()
            .filter_map(|topic| self.topics.get(topic))
            .any(|keys| {
                keys.contains(WILDCARD)
                    || keys.contains(&event.key)
                    || event.filter_keys.iter().any(|k| keys.contains(k))
            })
    }

    /// Returns the matching events of a batch, or `None` if nothing matched.
    pub(crate) fn apply(&self, batch: &Events) -> Option<Events> {
        let events: Vec<Event> = batch
            .events
            .iter()
            .filter(|event| self.matches(event))
            .cloned()
            .collect();

        if events.is_empty() {
            None
        } else {
            Some(Events {
                index: batch.index,
                events,
            })
        }
    }
}
