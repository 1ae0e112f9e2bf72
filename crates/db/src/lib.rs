use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

mod catalog;
mod cursors;
mod error;
mod events;
mod helpers;
mod limits;
mod migrations;
mod quota;
mod types;

pub use catalog::SqliteCatalog;
pub use error::{DbError, Result};
pub use limits::SqliteLimits;
pub use quota::SqliteQuotaStore;
pub use types::{IngestCursor, SubjectLimits};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "cache_size", -20_000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    /// Opens and migrates in one step.
    pub fn open_migrated(path: impl AsRef<Path>) -> Result<Self> {
        let mut db = Self::open(path)?;
        db.migrate()?;
        Ok(db)
    }
}
