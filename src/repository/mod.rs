//! Record store for pipeline entities.
//!
//! SQLite-backed, one short-lived connection per call with WAL and a busy
//! timeout so concurrent workers serialize cleanly on writes. Mutations fire
//! the hook set installed at startup; hooks are the only runtime coupling
//! between pipeline stages.

mod endpoint;
mod finding;
mod js_file;
mod store;

pub use store::{RecordHooks, RecordStore};

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

/// Errors from the record store.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("finding value exceeds {limit} bytes ({actual})")]
    ValueTooLarge { limit: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

pub(crate) fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Parse a stored RFC 3339 timestamp, defaulting to the Unix epoch on error.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
