use std::io;

use meter_core::{ChatMessage, UsageEvent};
use serde::Serialize;

/// Ingest summary returned after scanning event files.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub events_inserted: usize,
    pub messages_inserted: usize,
    pub lines_rejected: usize,
    pub bytes_read: u64,
    pub issues: Vec<IngestIssue>,
}

/// Non-fatal issues encountered during ingest.
#[derive(Debug, Clone, Serialize)]
pub struct IngestIssue {
    pub file_path: String,
    /// Byte offset of the offending line, when the issue concerns one line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub message: String,
}

/// Records parsed from one reader, before storage.
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    pub events: Vec<UsageEvent>,
    pub messages: Vec<ChatMessage>,
    pub issues: Vec<IngestIssue>,
}

/// Stats plus the records that were new to the database, for incremental
/// folding by the caller.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub stats: IngestStats,
    pub events: Vec<UsageEvent>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("db error: {0}")]
    Db(#[from] meter_db::DbError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
