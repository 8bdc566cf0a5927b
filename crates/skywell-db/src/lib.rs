//! Database layer for the Skywell AppView.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and the embedded migrations that create the three index relations:
//! `users`, `files`, and `file_keys`.
//!
//! SQLite in WAL mode lets the query handlers read concurrently while the
//! stream consumer writes. Migration SQL is compiled into the binary with
//! `include_str!`.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, open_index, DbError, DbPool, DbRuntimeSettings, PoolError};
