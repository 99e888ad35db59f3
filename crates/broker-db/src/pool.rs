//! SQLite pool setup.
//!
//! Every connection the pool hands out has been configured the same way at
//! creation time: WAL journaling so readers never block the writer, foreign
//! keys on, and a busy timeout so concurrent writers queue briefly instead
//! of failing with SQLITE_BUSY.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Pool sizing and SQLite timing knobs, fed from server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// The shared SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors from pool construction.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("could not initialize sqlite pool: {0}")]
    Init(#[from] r2d2::Error),
}

/// Opens the database at `db_path` (creating it if absent) and builds a
/// pool whose connections all carry the pragma configuration from
/// `settings`. `:memory:` is accepted for tests.
pub fn create_pool(db_path: &str, settings: PoolSettings) -> Result<DbPool, PoolError> {
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .with_init(move |conn| configure_connection(conn, settings.busy_timeout_ms));

    let pool = Pool::builder()
        .max_size(settings.max_connections)
        .build(manager)?;
    Ok(pool)
}

fn configure_connection(conn: &Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    // journal_mode is the one pragma whose answer matters: SQLite reports
    // the mode actually in effect, and an in-memory database answers
    // "memory" rather than "wal".
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if mode != "wal" && mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal_mode WAL not accepted (got {mode})")),
        ));
    }

    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {busy_timeout_ms};"
    ))
}
