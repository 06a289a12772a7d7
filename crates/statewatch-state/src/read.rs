//! Read access to committed state.

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use statewatch_types::{Deployment, Evaluation, Job};

use crate::error::StateError;

/// Point lookups used by derivers.
///
/// Implemented for [`Connection`], so an open SQLite transaction can be
/// passed directly and lookups see its uncommitted writes. A missing entity
/// is `Ok(None)`, never an error.
pub trait ReadTxn {
    fn job_by_id(&self, namespace: &str, id: &str) -> Result<Option<Job>, StateError>;

    fn deployment_by_id(&self, id: &str) -> Result<Option<Deployment>, StateError>;

    fn eval_by_id(&self, id: &str) -> Result<Option<Evaluation>, StateError>;
}

impl ReadTxn for Connection {
    fn job_by_id(&self, namespace: &str, id: &str) -> Result<Option<Job>, StateError> {
        let body = self
            .query_row(
                "SELECT body_json FROM jobs WHERE namespace = ?1 AND id = ?2",
                params![namespace, id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        parse_body(body)
    }

    fn deployment_by_id(&self, id: &str) -> Result<Option<Deployment>, StateError> {
        let body = self
            .query_row(
                "SELECT body_json FROM deployment WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        parse_body(body)
    }

    fn eval_by_id(&self, id: &str) -> Result<Option<Evaluation>, StateError> {
        let body = self
            .query_row(
                "SELECT body_json FROM evals WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        parse_body(body)
    }
}

/// Lists a job's deployments, oldest first.
///
/// # Errors
///
/// Returns `StateError::Database` on SQL failure or
/// `StateError::Serialization` if a stored body is corrupt.
pub fn deployments_by_job(
    conn: &Connection,
    namespace: &str,
    job_id: &str,
) -> Result<Vec<Deployment>, StateError> {
    list_bodies(
        conn,
        "SELECT body_json FROM deployment
         WHERE namespace = ?1 AND job_id = ?2
         ORDER BY create_index ASC",
        namespace,
        job_id,
    )
}

/// Lists a job's evaluations, oldest first.
///
/// # Errors
///
/// As [`deployments_by_job`].
pub fn evals_by_job(
    conn: &Connection,
    namespace: &str,
    job_id: &str,
) -> Result<Vec<Evaluation>, StateError> {
    list_bodies(
        conn,
        "SELECT body_json FROM evals
         WHERE namespace = ?1 AND job_id = ?2
         ORDER BY create_index ASC",
        namespace,
        job_id,
    )
}

fn list_bodies<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    namespace: &str,
    job_id: &str,
) -> Result<Vec<T>, StateError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![namespace, job_id], |row| row.get::<_, String>(0))?;

    let mut out = Vec::new();
    for body in rows {
        out.push(serde_json::from_str(&body?)?);
    }
    Ok(out)
}

fn parse_body<T: DeserializeOwned>(body: Option<String>) -> Result<Option<T>, StateError> {
    body.map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(StateError::from)
}
