//! Error types for the state store and event derivation.

use statewatch_stream::{StreamError, Topic};

/// Errors that can occur while committing, reading or deriving events.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A database operation failed.
    #[error("state database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled connection could be obtained.
    #[error("state pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// An entity body could not be serialised or deserialised.
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A change record carried an entity of the wrong type for its table.
    #[error("table '{table}' expected a {expected} entity, found {found}")]
    TypeMismatch {
        table: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A read made on behalf of a deriver failed.
    #[error("{entity} lookup failed: {source}")]
    Lookup {
        entity: &'static str,
        source: Box<StateError>,
    },

    /// A deriver failed; the transaction it was deriving for was not committed.
    #[error("deriving {topic} events failed: {source}")]
    Derive {
        topic: Topic,
        source: Box<StateError>,
    },

    /// `commit_at` was given an index that is not newer than the latest.
    #[error("commit index {index} is not newer than latest index {latest}")]
    StaleIndex { index: u64, latest: u64 },

    /// The entity a write refers to does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The write is not allowed in the entity's current state.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    /// The event broker rejected a publish.
    #[error(transparent)]
    Stream(#[from] StreamError),
}
