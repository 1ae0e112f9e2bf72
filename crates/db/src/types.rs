use meter_core::QuotaLimits;

/// Cursor metadata for incremental ingest runs.
#[derive(Debug, Clone)]
pub struct IngestCursor {
    pub file_path: String,
    pub inode: Option<u64>,
    pub mtime: Option<String>,
    pub byte_offset: u64,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectLimits {
    pub subject_id: String,
    pub limits: QuotaLimits,
    pub updated_at: String,
}
