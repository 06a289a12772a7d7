//! Per-consumer cursors over the event stream.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, Notify};

use crate::error::StreamError;
use crate::event::Events;
use crate::filter::EventFilter;

/// Close state shared between a subscription, its closers and the broker.
#[derive(Debug)]
pub(crate) struct SubscriptionShared {
    id: u64,
    closed: AtomicBool,
    notify: Notify,
}

impl SubscriptionShared {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Marks the subscription closed and wakes any blocked reader.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A cloneable handle that closes a [`Subscription`] from another task.
#[derive(Debug, Clone)]
pub struct SubscriptionCloser {
    shared: Arc<SubscriptionShared>,
}

impl SubscriptionCloser {
    /// Closes the subscription. A blocked `next` returns
    /// [`StreamError::Closed`]. Safe to call any number of times.
    pub fn close(&self) {
        if self.shared.close() {
            tracing::debug!(subscription_id = self.shared.id, "subscription closed by handle");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// A consumer's position in the event stream.
///
/// Created by [`EventBroker::subscribe`](crate::EventBroker::subscribe).
/// Batches published before the subscription was created are replayed from
/// the broker's buffer; later batches arrive through a bounded live queue.
/// Each successful `next*` returns the matching events of exactly one
/// commit index, and indices strictly increase from call to call.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    filter: EventFilter,
    cursor: u64,
    backlog: VecDeque<Arc<Events>>,
    live: Option<broadcast::Receiver<Arc<Events>>>,
    shared: Arc<SubscriptionShared>,
}

impl Subscription {
    pub(crate) fn new(
        filter: EventFilter,
        cursor: u64,
        backlog: VecDeque<Arc<Events>>,
        live: broadcast::Receiver<Arc<Events>>,
        shared: Arc<SubscriptionShared>,
    ) -> Self {
        Self {
            id: shared.id,
            filter,
            cursor,
            backlog,
            live: Some(live),
            shared,
        }
    }

    /// Broker-assigned identifier, unique per broker.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The lowest commit index that may still be delivered.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Returns a handle other tasks can use to close this subscription.
    pub fn closer(&self) -> SubscriptionCloser {
        SubscriptionCloser {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Waits for the next matching batch.
    ///
    /// # Errors
    ///
    /// [`StreamError::Closed`] once the subscription or the broker is
    /// closed, [`StreamError::Lagged`] when queued batches were dropped.
    pub async fn next(&mut self) -> Result<Events, StreamError> {
        self.next_until(std::future::pending()).await
    }

    /// Waits for the next matching batch or until `cancel` completes.
    ///
    /// Cancellation returns [`StreamError::Cancelled`] without consuming
    /// anything, so the call can be retried.
    ///
    /// # Errors
    ///
    /// As [`Subscription::next`], plus [`StreamError::Cancelled`].
    pub async fn next_until<F>(&mut self, cancel: F) -> Result<Events, StreamError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        loop {
            self.ensure_open()?;
            if let Some(events) = self.drain_backlog() {
                return Ok(events);
            }

            let shared = Arc::clone(&self.shared);
            let closed = shared.notify.notified();
            tokio::pin!(closed);
            // Register before re-checking so a close in between is not lost.
            closed.as_mut().enable();
            if shared.is_closed() {
                continue;
            }

            let Some(live) = self.live.as_mut() else {
                return Err(StreamError::Closed);
            };

            let received = tokio::select! {
                biased;
                () = &mut closed => continue,
                () = &mut cancel => return Err(StreamError::Cancelled),
                received = live.recv() => received,
            };

            match received {
                Ok(batch) => {
                    if let Some(events) = self.accept(&batch) {
                        return Ok(events);
                    }
                }
                Err(RecvError::Lagged(missed)) => return Err(self.lagged(missed)),
                Err(RecvError::Closed) => {
                    self.release();
                    return Err(StreamError::Closed);
                }
            }
        }
    }

    /// Returns the next matching batch if one is already available.
    ///
    /// `Ok(None)` means nothing is available yet; it is not an error.
    ///
    /// # Errors
    ///
    /// [`StreamError::Closed`] once closed, [`StreamError::Lagged`] when
    /// queued batches were dropped.
    pub fn next_no_block(&mut self) -> Result<Option<Events>, StreamError> {
        self.ensure_open()?;
        if let Some(events) = self.drain_backlog() {
            return Ok(Some(events));
        }

        loop {
            let Some(live) = self.live.as_mut() else {
                return Err(StreamError::Closed);
            };

            match live.try_recv() {
                Ok(batch) => {
                    if let Some(events) = self.accept(&batch) {
                        return Ok(Some(events));
                    }
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Lagged(missed)) => return Err(self.lagged(missed)),
                Err(TryRecvError::Closed) => {
                    self.release();
                    return Err(StreamError::Closed);
                }
            }
        }
    }

    /// Closes the subscription and drops its queued batches.
    ///
    /// Idempotent; later `next*` calls return [`StreamError::Closed`].
    pub fn unsubscribe(&mut self) {
        if self.shared.close() {
            tracing::debug!(subscription_id = self.id, cursor = self.cursor, "unsubscribed");
        }
        self.release();
    }

    fn ensure_open(&mut self) -> Result<(), StreamError> {
        if self.shared.is_closed() {
            self.release();
            return Err(StreamError::Closed);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.backlog.clear();
        self.live = None;
    }

    fn drain_backlog(&mut self) -> Option<Events> {
        while let Some(batch) = self.backlog.pop_front() {
            if let Some(events) = self.accept(&batch) {
                return Some(events);
            }
        }
        None
    }

    /// Filters a batch and moves the cursor past it.
    fn accept(&mut self, batch: &Events) -> Option<Events> {
        if batch.index < self.cursor {
            return None;
        }
        self.cursor = batch.index + 1;
        self.filter.apply(batch)
    }

    fn lagged(&self, missed: u64) -> StreamError {
        tracing::warn!(
            subscription_id = self.id,
            cursor = self.cursor,
            missed,
            "subscriber lagged; oldest queued batches were dropped"
        );
        StreamError::Lagged { missed }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.close();
    }
}
