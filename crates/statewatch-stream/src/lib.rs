//! Index-ordered, replayable event delivery.
//!
//! Every committed transaction produces at most one [`Events`] batch, tagged
//! with the transaction's commit index. The [`EventBroker`] appends batches
//! in commit order and hands them to any number of independent
//! [`Subscription`]s. Each subscription has its own cursor and filter, can
//! start at an arbitrary historical index, and can be drained either
//! blocking (with cancellation) or non-blocking.
//!
//! # Topics
//!
//! | Topic | Key | Filter keys |
//! |-------|-----|-------------|
//! | `Deployment` | deployment ID | job ID |
//! | `Job` | job ID | |
//! | `Evaluation` | evaluation ID | job ID, deployment ID |
//!
//! # Usage
//!
//! ```rust,ignore
//! use statewatch_stream::{BrokerConfig, EventBroker, SubscribeRequest, Topic};
//!
//! let broker = EventBroker::spawn(BrokerConfig::default());
//! let mut sub = broker
//!     .subscribe(SubscribeRequest::new(100).topic(Topic::Deployment, ["*"]))
//!     .await?;
//!
//! let batch = sub.next().await?;
//! assert!(batch.index >= 100);
//! ```
//!
//! # Lag
//!
//! Each subscription's live queue is bounded. When a consumer falls too far
//! behind, its oldest queued batches are dropped and the next read returns
//! [`StreamError::Lagged`]; the subscription stays usable afterwards.

mod broker;
mod error;
mod event;
mod filter;
mod subscription;

pub use broker::{BrokerConfig, BrokerStats, EventBroker};
pub use error::StreamError;
pub use event::{
    DeploymentEvent, EvaluationEvent, Event, EventPayload, Events, JobEvent, ParseTopicError, Topic,
};
pub use filter::SubscribeRequest;
pub use subscription::{Subscription, SubscriptionCloser};

#[cfg(test)]
mod tests;
