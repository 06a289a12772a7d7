//! In-memory read views for deriver unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use statewatch_types::{Deployment, Evaluation, Job};

use crate::error::StateError;
use crate::read::ReadTxn;

/// A read view backed by maps, counting job lookups.
#[derive(Default)]
pub(crate) struct MemoryState {
    pub jobs: HashMap<(String, String), Job>,
    pub job_lookups: AtomicUsize,
}

impl MemoryState {
    pub fn with_job(job: Job) -> Self {
        let mut state = Self::default();
        state
            .jobs
            .insert((job.namespace.clone(), job.id.clone()), job);
        state
    }

    pub fn job_lookups(&self) -> usize {
        self.job_lookups.load(Ordering::SeqCst)
    }
}

impl ReadTxn for MemoryState {
    fn job_by_id(&self, namespace: &str, id: &str) -> Result<Option<Job>, StateError> {
        self.job_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .jobs
            .get(&(namespace.to_string(), id.to_string()))
            .cloned())
    }

    fn deployment_by_id(&self, _id: &str) -> Result<Option<Deployment>, StateError> {
        Ok(None)
    }

    fn eval_by_id(&self, _id: &str) -> Result<Option<Evaluation>, StateError> {
        Ok(None)
    }
}

/// A read view whose every lookup fails with an I/O error.
pub(crate) struct FailingState;

fn io_error() -> StateError {
    StateError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
        Some("disk I/O error".to_string()),
    ))
}

impl ReadTxn for FailingState {
    fn job_by_id(&self, _namespace: &str, _id: &str) -> Result<Option<Job>, StateError> {
        Err(io_error())
    }

    fn deployment_by_id(&self, _id: &str) -> Result<Option<Deployment>, StateError> {
        Err(io_error())
    }

    fn eval_by_id(&self, _id: &str) -> Result<Option<Evaluation>, StateError> {
        Err(io_error())
    }
}
