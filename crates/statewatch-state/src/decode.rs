//! Table-to-entity dispatch for change records.
//!
//! Each known table maps to a decoder that checks the record's entities are
//! of the table's type and returns them as a [`TrackedChange`] variant.
//! Adding a table means adding one registry entry.

use statewatch_types::{Deployment, Evaluation, Job};

use crate::changes::{Change, Entity, TABLE_DEPLOYMENT, TABLE_EVALS, TABLE_JOBS};
use crate::error::StateError;

/// A change record whose entities have been checked against its table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackedChange<'a> {
    Job {
        before: Option<&'a Job>,
        after: Option<&'a Job>,
    },
    Deployment {
        before: Option<&'a Deployment>,
        after: Option<&'a Deployment>,
    },
    Evaluation {
        before: Option<&'a Evaluation>,
        after: Option<&'a Evaluation>,
    },
}

type Decoder = for<'a> fn(&'a Change) -> Result<TrackedChange<'a>, StateError>;

const DECODERS: &[(&str, Decoder)] = &[
    (TABLE_JOBS, decode_job),
    (TABLE_DEPLOYMENT, decode_deployment),
    (TABLE_EVALS, decode_evaluation),
];

/// Decodes a change record.
///
/// Returns `Ok(None)` for tables no deriver cares about.
///
/// # Errors
///
/// Returns `StateError::TypeMismatch` if the record holds an entity that is
/// not the table's type.
pub fn decode(change: &Change) -> Result<Option<TrackedChange<'_>>, StateError> {
    match DECODERS.iter().find(|(table, _)| *table == change.table) {
        Some((_, decoder)) => decoder(change).map(Some),
        None => {
            tracing::trace!(table = %change.table, "ignoring change to untracked table");
            Ok(None)
        }
    }
}

fn decode_job(change: &Change) -> Result<TrackedChange<'_>, StateError> {
    Ok(TrackedChange::Job {
        before: typed(change, change.before.as_ref(), "job", Entity::as_job)?,
        after: typed(change, change.after.as_ref(), "job", Entity::as_job)?,
    })
}

fn decode_deployment(change: &Change) -> Result<TrackedChange<'_>, StateError> {
    Ok(TrackedChange::Deployment {
        before: typed(change, change.before.as_ref(), "deployment", Entity::as_deployment)?,
        after: typed(change, change.after.as_ref(), "deployment", Entity::as_deployment)?,
    })
}

fn decode_evaluation(change: &Change) -> Result<TrackedChange<'_>, StateError> {
    Ok(TrackedChange::Evaluation {
        before: typed(change, change.before.as_ref(), "evaluation", Entity::as_evaluation)?,
        after: typed(change, change.after.as_ref(), "evaluation", Entity::as_evaluation)?,
    })
}

fn typed<'a, T>(
    change: &Change,
    entity: Option<&'a Entity>,
    expected: &'static str,
    project: fn(&'a Entity) -> Option<&'a T>,
) -> Result<Option<&'a T>, StateError> {
    let Some(entity) = entity else {
        return Ok(None);
    };
    project(entity)
        .map(Some)
        .ok_or_else(|| StateError::TypeMismatch {
            table: change.table.clone(),
            expected,
            found: entity.kind(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use statewatch_types::DEFAULT_NAMESPACE;

    #[test]
    fn decodes_known_tables() {
        let job = Job::new(DEFAULT_NAMESPACE, "web");
        let change = Change::new(TABLE_JOBS, None, Some(Entity::Job(job.clone())));

        let decoded = decode(&change).unwrap().unwrap();
        assert_eq!(
            decoded,
            TrackedChange::Job {
                before: None,
                after: Some(&job)
            }
        );
    }

    #[test]
    fn unknown_table_is_ignored() {
        let job = Job::new(DEFAULT_NAMESPACE, "web");
        let change = Change::new("nodes", None, Some(Entity::Job(job)));
        assert!(decode(&change).unwrap().is_none());
    }

    #[test]
    fn wrong_entity_type_is_a_mismatch() {
        let job = Job::new(DEFAULT_NAMESPACE, "web");
        let change = Change::new(TABLE_DEPLOYMENT, None, Some(Entity::Job(job)));

        let err = decode(&change).unwrap_err();
        assert!(matches!(
            err,
            StateError::TypeMismatch {
                expected: "deployment",
                found: "job",
                ..
            }
        ));
    }
}
