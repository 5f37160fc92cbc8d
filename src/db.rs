//! SQLite store shared by the translation cache, the user glossaries and
//! monthly usage. One connection behind a mutex; schema is created on open.
//!
//! Every access pattern the pipeline needs is backed by an index:
//! - cache: (cache_key, source_language, target_language), unique
//! - glossary: (user_id, source_language, target_language, term), unique
//! - glossary listing: (user_id, source_language, target_language)
//! - usage: (user_id, month), primary key

use std::path::Path;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS translations_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cache_key TEXT NOT NULL,
    original_text TEXT NOT NULL,
    source_language TEXT NOT NULL,
    target_language TEXT NOT NULL,
    translated_text TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (cache_key, source_language, target_language)
);

CREATE TABLE IF NOT EXISTS user_glossaries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    term TEXT NOT NULL,
    custom_translation TEXT NOT NULL,
    source_language TEXT NOT NULL,
    target_language TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (user_id, source_language, target_language, term)
);
CREATE INDEX IF NOT EXISTS idx_glossary_user_languages
    ON user_glossaries(user_id, source_language, target_language);

CREATE TABLE IF NOT EXISTS user_monthly_usage (
    user_id TEXT NOT NULL,
    month TEXT NOT NULL,
    translated_characters INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, month)
);
";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).map_err(|source| StoreError::Open {
            path: db_path.display().to_string(),
            source,
        })?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), "database opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".into(),
            source,
        })?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Exclusive access to the connection. Holding the guard across a
    /// read-then-write makes that sequence atomic with respect to other callers.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Current time as Unix timestamp (seconds).
pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// True when the error is a UNIQUE / PRIMARY KEY violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
