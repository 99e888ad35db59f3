//! Database layer for the trustbroker platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. Every table the broker touches is created
//! through versioned migrations managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: the broker is a control-plane service with
//!   modest write volume; WAL allows concurrent readers with a single
//!   writer and requires no external database process.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so migrations ship with the server and cannot drift
//!   from the code that depends on them.
//! - **Uniqueness in the schema, not the application**: replay protection
//!   (`data_requests.consent_token_jti`) and relationship uniqueness are
//!   UNIQUE constraints so concurrent writers race inside SQLite, not in
//!   read-then-write application code.

mod migrations;
mod pool;

pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool, PoolError, PoolSettings};
