//! The event broker: a single task that owns ordering state.
//!
//! All index bookkeeping, the replay buffer and the subscriber registry
//! live inside one spawned task. Handles talk to it over a channel, so
//! publishes are applied strictly in the order they were sent and no lock
//! guards index assignment. Published batches are wrapped in `Arc` and
//! never mutated again; subscriptions read them without coordination.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::StreamError;
use crate::event::Events;
use crate::filter::SubscribeRequest;
use crate::subscription::{Subscription, SubscriptionShared};

/// Sizing for the broker's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Number of most recent batches kept for replay to new subscribers.
    pub buffer_size: usize,
    /// Capacity of each subscriber's live queue, in batches. A subscriber
    /// that falls further behind loses its oldest queued batches.
    pub subscriber_queue_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            subscriber_queue_size: 256,
        }
    }
}

/// Point-in-time counters reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStats {
    /// Index of the most recent publish, `0` before the first.
    pub last_index: u64,
    /// Batches currently held in the replay buffer.
    pub buffered_batches: usize,
    /// Subscriptions that have not been closed.
    pub open_subscriptions: usize,
}

enum Command {
    Publish(Events),
    Subscribe {
        request: SubscribeRequest,
        reply: oneshot::Sender<Result<Subscription, StreamError>>,
    },
    LastIndex(oneshot::Sender<u64>),
    Stats(oneshot::Sender<BrokerStats>),
    Shutdown,
}

/// Handle to the broker task.
///
/// Cloning is cheap. The task exits when every handle is dropped or
/// [`EventBroker::shutdown`] is called; either way all open subscriptions
/// are closed.
#[derive(Debug, Clone)]
pub struct EventBroker {
    commands: mpsc::UnboundedSender<Command>,
}

impl EventBroker {
    /// Spawns the broker task on the current tokio runtime.
    pub fn spawn(config: BrokerConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let broker = Broker::new(config);
        tokio::spawn(broker.run(rx));
        Self { commands }
    }

    /// Appends a batch to the stream.
    ///
    /// Must be called in commit order. The batch becomes visible to
    /// subscribers as a unit once the broker processes it; use
    /// [`EventBroker::last_index`] to wait for that. A batch whose index is
    /// not greater than the last published index is rejected and logged.
    ///
    /// # Errors
    ///
    /// [`StreamError::BrokerStopped`] if the broker task has exited.
    pub fn publish(&self, events: Events) -> Result<(), StreamError> {
        self.commands
            .send(Command::Publish(events))
            .map_err(|_| StreamError::BrokerStopped)
    }

    /// Registers a new subscription.
    ///
    /// Buffered batches at or above `request.index` are replayed first,
    /// followed by every batch published afterwards, with no gap or
    /// duplicate between the two.
    ///
    /// # Errors
    ///
    /// [`StreamError::IndexUnavailable`] if `start_exactly_at_index` is set
    /// and the history has been evicted; [`StreamError::BrokerStopped`] if
    /// the broker task has exited.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, StreamError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { request, reply })
            .map_err(|_| StreamError::BrokerStopped)?;
        rx.await.map_err(|_| StreamError::BrokerStopped)?
    }

    /// Returns the index of the most recent publish.
    ///
    /// Every publish sent before this call is visible once it returns.
    ///
    /// # Errors
    ///
    /// [`StreamError::BrokerStopped`] if the broker task has exited.
    pub async fn last_index(&self) -> Result<u64, StreamError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::LastIndex(reply))
            .map_err(|_| StreamError::BrokerStopped)?;
        rx.await.map_err(|_| StreamError::BrokerStopped)
    }

    /// Returns buffer and subscription counters.
    ///
    /// # Errors
    ///
    /// [`StreamError::BrokerStopped`] if the broker task has exited.
    pub async fn stats(&self) -> Result<BrokerStats, StreamError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(reply))
            .map_err(|_| StreamError::BrokerStopped)?;
        rx.await.map_err(|_| StreamError::BrokerStopped)
    }

    /// Stops the broker and closes every open subscription.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Broker {
    config: BrokerConfig,
    buffer: VecDeque<Arc<Events>>,
    live: broadcast::Sender<Arc<Events>>,
    last_index: u64,
    /// Highest index evicted from `buffer`, if any.
    evicted_through: Option<u64>,
    subscriptions: HashMap<u64, Arc<SubscriptionShared>>,
    next_id: u64,
}

impl Broker {
    fn new(config: BrokerConfig) -> Self {
        let (live, _) = broadcast::channel(config.subscriber_queue_size.max(1));
        Self {
            config,
            buffer: VecDeque::with_capacity(config.buffer_size),
            live,
            last_index: 0,
            evicted_through: None,
            subscriptions: HashMap::new(),
            next_id: 1,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!(
            buffer_size = self.config.buffer_size,
            subscriber_queue_size = self.config.subscriber_queue_size,
            "event broker started"
        );

        while let Some(command) = commands.recv().await {
            match command {
                Command::Publish(events) => self.publish(events),
                Command::Subscribe { request, reply } => {
                    let _ = reply.send(self.subscribe(request));
                }
                Command::LastIndex(reply) => {
                    let _ = reply.send(self.last_index);
                }
                Command::Stats(reply) => {
                    self.prune_closed();
                    let _ = reply.send(BrokerStats {
                        last_index: self.last_index,
                        buffered_batches: self.buffer.len(),
                        open_subscriptions: self.subscriptions.len(),
                    });
                }
                Command::Shutdown => break,
            }
        }

        for shared in self.subscriptions.values() {
            shared.close();
        }
        tracing::debug!(
            last_index = self.last_index,
            closed_subscriptions = self.subscriptions.len(),
            "event broker stopped"
        );
    }

    fn publish(&mut self, events: Events) {
        if events.index <= self.last_index {
            tracing::error!(
                index = events.index,
                last_index = self.last_index,
                "rejected out-of-order event batch"
            );
            return;
        }
        self.last_index = events.index;

        if events.is_empty() {
            return;
        }

        tracing::trace!(index = events.index, count = events.len(), "publishing event batch");

        let batch = Arc::new(events);
        self.buffer.push_back(Arc::clone(&batch));
        while self.buffer.len() > self.config.buffer_size {
            if let Some(evicted) = self.buffer.pop_front() {
                self.evicted_through = Some(evicted.index);
            }
        }

        // An error only means there are no live receivers right now.
        let _ = self.live.send(batch);
        self.prune_closed();
    }

    fn subscribe(&mut self, request: SubscribeRequest) -> Result<Subscription, StreamError> {
        if let Some(evicted) = self.evicted_through {
            if request.index <= evicted {
                let oldest = self
                    .buffer
                    .front()
                    .map_or(self.last_index + 1, |batch| batch.index);
                if request.start_exactly_at_index {
                    return Err(StreamError::IndexUnavailable {
                        requested: request.index,
                        oldest,
                    });
                }
                tracing::debug!(
                    requested = request.index,
                    oldest,
                    "requested history partially evicted, starting at oldest buffered batch"
                );
            }
        }

        let backlog: VecDeque<Arc<Events>> = self
            .buffer
            .iter()
            .filter(|batch| batch.index >= request.index)
            .cloned()
            .collect();

        let id = self.next_id;
        self.next_id += 1;
        let shared = Arc::new(SubscriptionShared::new(id));
        self.subscriptions.insert(id, Arc::clone(&shared));

        tracing::debug!(
            subscription_id = id,
            index = request.index,
            replayed = backlog.len(),
            "subscription registered"
        );

        Ok(Subscription::new(
            request.filter(),
            request.index,
            backlog,
            self.live.subscribe(),
            shared,
        ))
    }

    fn prune_closed(&mut self) {
        self.subscriptions.retain(|_, shared| !shared.is_closed());
    }
}
