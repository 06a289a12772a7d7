//! Schema migrations for the state store.
//!
//! The SQL lives next to this file and is compiled in. A migration is
//! recorded in `_statewatch_migrations` in the same transaction that applies
//! it.

use std::collections::HashSet;

use rusqlite::Connection;
use thiserror::Error;

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _statewatch_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// `(name, sql)` pairs, applied in list order.
type Migration = (&'static str, &'static str);

const MIGRATIONS: &[Migration] = &[
    ("000_init", include_str!("migrations/000_init.sql")),
    ("001_jobs", include_str!("migrations/001_jobs.sql")),
    ("002_deployment", include_str!("migrations/002_deployment.sql")),
    ("003_evals", include_str!("migrations/003_evals.sql")),
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to create migration tracking table: {0}")]
    Bootstrap(#[source] rusqlite::Error),

    #[error("failed to read applied migrations: {0}")]
    StateQuery(#[source] rusqlite::Error),

    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        #[source]
        source: rusqlite::Error,
    },
}

/// Brings the schema up to date and returns how many migrations ran.
///
/// # Errors
///
/// Returns `MigrationError` when the tracking table is unusable or a
/// migration fails. The failing migration is rolled back.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply_pending(conn, MIGRATIONS)
}

fn applied_names(conn: &Connection) -> Result<HashSet<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT name FROM _statewatch_migrations")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}

fn apply_one(conn: &Connection, (name, sql): Migration) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.execute("INSERT INTO _statewatch_migrations (name) VALUES (?1)", [name])?;
    tx.commit()
}

fn apply_pending(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(TRACKING_TABLE)
        .map_err(MigrationError::Bootstrap)?;
    let done = applied_names(conn).map_err(MigrationError::StateQuery)?;

    let pending: Vec<Migration> = migrations
        .iter()
        .copied()
        .filter(|(name, _)| !done.contains(*name))
        .collect();
    if pending.is_empty() {
        tracing::debug!(known = migrations.len(), "schema is current");
        return Ok(0);
    }

    for migration in &pending {
        tracing::info!(migration = migration.0, "applying migration");
        apply_one(conn, *migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.0.to_string(),
            source,
        })?;
    }
    Ok(pending.len())
}
