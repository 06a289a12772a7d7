//! SQLite storage layer for the statewatch state store.
//!
//! Provides connection pooling (via `r2d2`), WAL-mode initialization and
//! embedded, versioned SQL migrations for the `jobs`, `deployment` and
//! `evals` tables plus the commit index bookkeeping table.
//!
//! The schema stores each entity as a JSON body next to the columns it is
//! looked up by. Row decoding and change tracking live in
//! `statewatch-state`; this crate only owns connections and schema.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
