//! SQLite-backed state store with change tracking.
//!
//! Writes are serialised by a writer lock and run in an immediate SQLite
//! transaction. Each transaction gets a commit index one above the latest
//! (or a caller-supplied newer one), records a [`Change`] for every entity
//! it touches, and, when a publisher is attached, has its events derived
//! before the transaction commits and published right after.

use std::sync::Mutex;

use rusqlite::{params, Connection, TransactionBehavior};
use statewatch_db::DbPool;
use statewatch_types::{
    Deployment, DeploymentStatusUpdate, Evaluation, Job, JobStatus,
};

use crate::changes::{Change, ChangeSet, Entity, MsgType, TABLE_DEPLOYMENT, TABLE_EVALS, TABLE_JOBS};
use crate::error::StateError;
use crate::events::EventPublisher;
use crate::read::{self, ReadTxn};

/// A deployment status change, optionally committed together with a job
/// update and a follow-up evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentStatusUpdateRequest {
    pub update: DeploymentStatusUpdate,
    pub job: Option<Job>,
    pub eval: Option<Evaluation>,
}

/// The committed state of jobs, deployments and evaluations.
pub struct StateStore {
    pool: DbPool,
    publisher: Option<EventPublisher>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Creates a store that does not publish events.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            publisher: None,
            writer: Mutex::new(()),
        }
    }

    /// Creates a store that publishes every commit through `publisher`.
    pub fn with_publisher(pool: DbPool, publisher: EventPublisher) -> Self {
        Self {
            pool,
            publisher: Some(publisher),
            writer: Mutex::new(()),
        }
    }

    pub fn publisher(&self) -> Option<&EventPublisher> {
        self.publisher.as_ref()
    }

    /// Returns the index of the most recent commit, `0` if none.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Pool` or `StateError::Database`.
    pub fn latest_index(&self) -> Result<u64, StateError> {
        let conn = self.pool.get()?;
        read_latest_index(&conn)
    }

    /// Runs `apply` in a new transaction at the next commit index.
    ///
    /// Returns the commit index together with `apply`'s result. If `apply`
    /// or event derivation fails, nothing is written.
    ///
    /// # Errors
    ///
    /// Whatever `apply` returns, `StateError::Derive` from the publisher,
    /// or a database error.
    pub fn commit<T, F>(&self, msg_type: MsgType, apply: F) -> Result<(u64, T), StateError>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T, StateError>,
    {
        self.commit_inner(None, msg_type, apply)
    }

    /// As [`StateStore::commit`], at a caller-chosen index.
    ///
    /// # Errors
    ///
    /// Returns `StateError::StaleIndex` if `index` is not newer than the
    /// latest commit index.
    pub fn commit_at<T, F>(&self, index: u64, msg_type: MsgType, apply: F) -> Result<(u64, T), StateError>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T, StateError>,
    {
        self.commit_inner(Some(index), msg_type, apply)
    }

    fn commit_inner<T, F>(
        &self,
        requested: Option<u64>,
        msg_type: MsgType,
        apply: F,
    ) -> Result<(u64, T), StateError>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T, StateError>,
    {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("state writer lock was poisoned; recovering");
            poisoned.into_inner()
        });

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let latest = read_latest_index(&tx)?;
        let index = match requested {
            Some(index) if index <= latest => {
                return Err(StateError::StaleIndex { index, latest });
            }
            Some(index) => index,
            None => latest + 1,
        };

        let mut txn = WriteTxn::new(&tx, index);
        let value = apply(&mut txn)?;
        let changes = txn.into_change_set(msg_type);

        tx.execute(
            "UPDATE state_index SET value = ?1 WHERE name = 'latest'",
            params![index],
        )?;

        let events = match &self.publisher {
            Some(publisher) => Some(publisher.derive(&*tx, &changes)?),
            None => None,
        };

        tx.commit()?;

        tracing::debug!(
            index,
            %msg_type,
            changes = changes.changes.len(),
            "committed transaction"
        );

        // Published under the writer lock so batches reach the broker in
        // commit order.
        if let (Some(publisher), Some(events)) = (&self.publisher, events) {
            if let Err(error) = publisher.publish(events) {
                tracing::error!(index, %error, "committed transaction but could not publish its events");
            }
        }

        Ok((index, value))
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `StateError::Pool`, `StateError::Database` or
    /// `StateError::Serialization`.
    pub fn job_by_id(&self, namespace: &str, id: &str) -> Result<Option<Job>, StateError> {
        self.pool.get()?.job_by_id(namespace, id)
    }

    /// # Errors
    ///
    /// As [`StateStore::job_by_id`].
    pub fn deployment_by_id(&self, id: &str) -> Result<Option<Deployment>, StateError> {
        self.pool.get()?.deployment_by_id(id)
    }

    /// # Errors
    ///
    /// As [`StateStore::job_by_id`].
    pub fn eval_by_id(&self, id: &str) -> Result<Option<Evaluation>, StateError> {
        self.pool.get()?.eval_by_id(id)
    }

    /// # Errors
    ///
    /// As [`StateStore::job_by_id`].
    pub fn deployments_by_job(&self, namespace: &str, job_id: &str) -> Result<Vec<Deployment>, StateError> {
        let conn = self.pool.get()?;
        read::deployments_by_job(&conn, namespace, job_id)
    }

    /// # Errors
    ///
    /// As [`StateStore::job_by_id`].
    pub fn evals_by_job(&self, namespace: &str, job_id: &str) -> Result<Vec<Evaluation>, StateError> {
        let conn = self.pool.get()?;
        read::evals_by_job(&conn, namespace, job_id)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Registers or updates a job, with an optional evaluation in the same
    /// commit.
    ///
    /// # Errors
    ///
    /// Any commit error.
    pub fn upsert_job(&self, job: Job, eval: Option<Evaluation>) -> Result<(u64, Job), StateError> {
        self.commit(MsgType::JobRegister, |txn| {
            let job = txn.upsert_job(job)?;
            if let Some(eval) = eval {
                txn.upsert_evals(vec![eval])?;
            }
            Ok(job)
        })
    }

    /// Deregisters a job.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the job does not exist.
    pub fn delete_job(&self, namespace: &str, id: &str) -> Result<(u64, Job), StateError> {
        self.commit(MsgType::JobDeregister, |txn| {
            txn.delete_job(namespace, id)?.ok_or_else(|| StateError::NotFound {
                entity: "job",
                id: id.to_string(),
            })
        })
    }

    /// # Errors
    ///
    /// Any commit error.
    pub fn upsert_deployment(&self, deployment: Deployment) -> Result<(u64, Deployment), StateError> {
        self.commit(MsgType::DeploymentUpsert, |txn| txn.upsert_deployment(deployment))
    }

    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the deployment does not exist.
    pub fn delete_deployment(&self, id: &str) -> Result<(u64, Deployment), StateError> {
        self.commit(MsgType::DeploymentDelete, |txn| {
            txn.delete_deployment(id)?.ok_or_else(|| StateError::NotFound {
                entity: "deployment",
                id: id.to_string(),
            })
        })
    }

    /// # Errors
    ///
    /// Any commit error.
    pub fn upsert_evals(&self, evals: Vec<Evaluation>) -> Result<(u64, Vec<Evaluation>), StateError> {
        self.commit(MsgType::EvalUpdate, |txn| txn.upsert_evals(evals))
    }

    /// Applies a deployment status update.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the deployment does not exist.
    pub fn update_deployment_status(
        &self,
        request: DeploymentStatusUpdateRequest,
    ) -> Result<(u64, Deployment), StateError> {
        self.commit(MsgType::DeploymentStatusUpdate, |txn| {
            txn.update_deployment_status(request)
        })
    }
}

/// An open write transaction at a fixed commit index.
///
/// Reads through a `WriteTxn` see its own writes.
pub struct WriteTxn<'a> {
    conn: &'a Connection,
    index: u64,
    changes: Vec<Change>,
}

impl<'a> WriteTxn<'a> {
    fn new(conn: &'a Connection, index: u64) -> Self {
        Self {
            conn,
            index,
            changes: Vec::new(),
        }
    }

    /// Commit index every write in this transaction is stamped with.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Changes recorded so far.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Inserts or replaces a job, maintaining its indices and version.
    ///
    /// # Errors
    ///
    /// Returns a database or serialisation error.
    pub fn upsert_job(&mut self, mut job: Job) -> Result<Job, StateError> {
        let existing = self.conn.job_by_id(&job.namespace, &job.id)?;
        match &existing {
            Some(prev) => {
                job.create_index = prev.create_index;
                job.version = prev.version + 1;
            }
            None => {
                job.create_index = self.index;
                job.version = 0;
            }
        }
        job.modify_index = self.index;
        if job.stop {
            job.status = JobStatus::Dead;
        }

        self.conn.execute(
            "INSERT INTO jobs (namespace, id, body_json, create_index, modify_index)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (namespace, id) DO UPDATE SET
                body_json = excluded.body_json,
                modify_index = excluded.modify_index",
            params![
                job.namespace,
                job.id,
                serde_json::to_string(&job)?,
                job.create_index,
                job.modify_index,
            ],
        )?;

        self.track(TABLE_JOBS, existing.map(Entity::Job), Some(Entity::Job(job.clone())));
        Ok(job)
    }

    /// Deletes a job. Returns the deleted job, or `None` if there was none.
    ///
    /// # Errors
    ///
    /// Returns a database or serialisation error.
    pub fn delete_job(&mut self, namespace: &str, id: &str) -> Result<Option<Job>, StateError> {
        let Some(existing) = self.conn.job_by_id(namespace, id)? else {
            return Ok(None);
        };
        self.conn.execute(
            "DELETE FROM jobs WHERE namespace = ?1 AND id = ?2",
            params![namespace, id],
        )?;
        self.track(TABLE_JOBS, Some(Entity::Job(existing.clone())), None);
        Ok(Some(existing))
    }

    /// Inserts or replaces a deployment.
    ///
    /// # Errors
    ///
    /// Returns a database or serialisation error.
    pub fn upsert_deployment(&mut self, mut deployment: Deployment) -> Result<Deployment, StateError> {
        let existing = self.conn.deployment_by_id(&deployment.id)?;
        deployment.create_index = existing
            .as_ref()
            .map_or(self.index, |prev| prev.create_index);
        deployment.modify_index = self.index;

        self.conn.execute(
            "INSERT INTO deployment (id, namespace, job_id, body_json, create_index, modify_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (id) DO UPDATE SET
                body_json = excluded.body_json,
                modify_index = excluded.modify_index",
            params![
                deployment.id,
                deployment.namespace,
                deployment.job_id,
                serde_json::to_string(&deployment)?,
                deployment.create_index,
                deployment.modify_index,
            ],
        )?;

        self.track(
            TABLE_DEPLOYMENT,
            existing.map(Entity::Deployment),
            Some(Entity::Deployment(deployment.clone())),
        );
        Ok(deployment)
    }

    /// Deletes a deployment. Returns it, or `None` if there was none.
    ///
    /// # Errors
    ///
    /// Returns a database or serialisation error.
    pub fn delete_deployment(&mut self, id: &str) -> Result<Option<Deployment>, StateError> {
        let Some(existing) = self.conn.deployment_by_id(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM deployment WHERE id = ?1", params![id])?;
        self.track(TABLE_DEPLOYMENT, Some(Entity::Deployment(existing.clone())), None);
        Ok(Some(existing))
    }

    /// Inserts or replaces evaluations.
    ///
    /// # Errors
    ///
    /// Returns a database or serialisation error.
    pub fn upsert_evals(&mut self, evals: Vec<Evaluation>) -> Result<Vec<Evaluation>, StateError> {
        let mut stored = Vec::with_capacity(evals.len());
        for mut eval in evals {
            let existing = self.conn.eval_by_id(&eval.id)?;
            eval.create_index = existing
                .as_ref()
                .map_or(self.index, |prev| prev.create_index);
            eval.modify_index = self.index;

            self.conn.execute(
                "INSERT INTO evals
                    (id, namespace, job_id, deployment_id, body_json, create_index, modify_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (id) DO UPDATE SET
                    body_json = excluded.body_json,
                    modify_index = excluded.modify_index",
                params![
                    eval.id,
                    eval.namespace,
                    eval.job_id,
                    eval.deployment_id,
                    serde_json::to_string(&eval)?,
                    eval.create_index,
                    eval.modify_index,
                ],
            )?;

            self.track(
                TABLE_EVALS,
                existing.map(Entity::Evaluation),
                Some(Entity::Evaluation(eval.clone())),
            );
            stored.push(eval);
        }
        Ok(stored)
    }

    /// Sets a deployment's status, then writes the request's job and
    /// evaluation if present.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the deployment does not exist.
    pub fn update_deployment_status(
        &mut self,
        request: DeploymentStatusUpdateRequest,
    ) -> Result<Deployment, StateError> {
        let DeploymentStatusUpdateRequest { update, job, eval } = request;

        let mut deployment = self
            .conn
            .deployment_by_id(&update.deployment_id)?
            .ok_or_else(|| StateError::NotFound {
                entity: "deployment",
                id: update.deployment_id.clone(),
            })?;
        deployment.status = update.status;
        deployment.status_description = update.status_description;
        let deployment = self.upsert_deployment(deployment)?;

        if let Some(job) = job {
            self.upsert_job(job)?;
        }
        if let Some(eval) = eval {
            self.upsert_evals(vec![eval])?;
        }
        Ok(deployment)
    }

    /// Records a change, collapsing repeated writes to one row into a
    /// single record with the first `before` and the last `after`.
    fn track(&mut self, table: &str, before: Option<Entity>, after: Option<Entity>) {
        let change = Change::new(table, before, after);
        let Some(key) = change.key().map(|(ns, id)| (ns.to_string(), id.to_string())) else {
            return;
        };

        let existing = self.changes.iter().position(|c| {
            c.table == table && c.key().is_some_and(|(ns, id)| ns == key.0 && id == key.1)
        });

        match existing {
            Some(pos) => {
                let prev = &mut self.changes[pos];
                prev.after = change.after;
                // Created and deleted within one transaction: nothing happened.
                if prev.before.is_none() && prev.after.is_none() {
                    self.changes.remove(pos);
                }
            }
            None => self.changes.push(change),
        }
    }

    fn into_change_set(self, msg_type: MsgType) -> ChangeSet {
        ChangeSet::new(self.index, msg_type, self.changes)
    }
}

impl ReadTxn for WriteTxn<'_> {
    fn job_by_id(&self, namespace: &str, id: &str) -> Result<Option<Job>, StateError> {
        self.conn.job_by_id(namespace, id)
    }

    fn deployment_by_id(&self, id: &str) -> Result<Option<Deployment>, StateError> {
        self.conn.deployment_by_id(id)
    }

    fn eval_by_id(&self, id: &str) -> Result<Option<Evaluation>, StateError> {
        self.conn.eval_by_id(id)
    }
}

fn read_latest_index(conn: &Connection) -> Result<u64, StateError> {
    let index: u64 = conn.query_row(
        "SELECT value FROM state_index WHERE name = 'latest'",
        [],
        |row| row.get(0),
    )?;
    Ok(index)
}
