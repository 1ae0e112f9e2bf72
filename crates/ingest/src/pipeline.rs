use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use meter_db::{Db, IngestCursor};
use rayon::prelude::*;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::parser::record_line;
use crate::types::{IngestIssue, IngestOutcome, IngestStats, ParsedBatch, Result};

fn is_event_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|value| value.to_str()),
        Some("jsonl") | Some("ndjson")
    )
}

struct FileTask {
    path: PathBuf,
    file_path: String,
    inode: Option<u64>,
    mtime: Option<String>,
    start_offset: u64,
}

struct ParsedFile {
    file_path: String,
    inode: Option<u64>,
    mtime: Option<String>,
    start_offset: u64,
    bytes_read: u64,
    batch: ParsedBatch,
    skipped: bool,
}

impl ParsedFile {
    fn skipped(task: FileTask, issue: IngestIssue) -> Self {
        Self {
            file_path: task.file_path,
            inode: task.inode,
            mtime: task.mtime,
            start_offset: task.start_offset,
            bytes_read: 0,
            batch: ParsedBatch {
                issues: vec![issue],
                ..ParsedBatch::default()
            },
            skipped: true,
        }
    }
}

fn parse_file(task: FileTask) -> ParsedFile {
    let mut file = match File::open(&task.path) {
        Ok(file) => file,
        Err(err) => {
            let issue = IngestIssue {
                file_path: task.file_path.clone(),
                offset: None,
                message: err.to_string(),
            };
            return ParsedFile::skipped(task, issue);
        }
    };
    if let Err(err) = file.seek(SeekFrom::Start(task.start_offset)) {
        let issue = IngestIssue {
            file_path: task.file_path.clone(),
            offset: Some(task.start_offset),
            message: err.to_string(),
        };
        return ParsedFile::skipped(task, issue);
    }

    let mut reader = BufReader::new(file);
    let mut batch = ParsedBatch::default();
    let mut bytes_read = 0u64;
    let mut buf = String::new();
    loop {
        buf.clear();
        match reader.read_line(&mut buf) {
            Ok(0) => break,
            Ok(bytes) => {
                // A trailing line without a newline may still be written to;
                // leave it for the next run.
                if !buf.ends_with('\n') {
                    break;
                }
                let offset = task.start_offset.saturating_add(bytes_read);
                record_line(&mut batch, &buf, &task.file_path, offset);
                bytes_read = bytes_read.saturating_add(bytes as u64);
            }
            Err(err) => {
                batch.issues.push(IngestIssue {
                    file_path: task.file_path.clone(),
                    offset: Some(task.start_offset.saturating_add(bytes_read)),
                    message: err.to_string(),
                });
                break;
            }
        }
    }

    ParsedFile {
        file_path: task.file_path,
        inode: task.inode,
        mtime: task.mtime,
        start_offset: task.start_offset,
        bytes_read,
        batch,
        skipped: false,
    }
}

/// Reads every `.jsonl`/`.ndjson` file under `root`, resuming each file from
/// its stored cursor. Files are parsed in parallel; storage is sequential.
pub fn ingest_dir(db: &mut Db, root: &Path) -> Result<IngestOutcome> {
    let started = Instant::now();
    let mut stats = IngestStats::default();
    if !root.is_dir() {
        debug!(root = %root.display(), "event directory missing; nothing to ingest");
        return Ok(IngestOutcome {
            stats,
            ..IngestOutcome::default()
        });
    }

    let mut tasks = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let file_path = err
                    .path()
                    .map(|path| path.to_string_lossy().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                stats.issues.push(IngestIssue {
                    file_path,
                    offset: None,
                    message: err.to_string(),
                });
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_event_path(path) {
            continue;
        }
        stats.files_scanned += 1;
        let file_path = path.to_string_lossy().to_string();
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                stats.files_skipped += 1;
                stats.issues.push(IngestIssue {
                    file_path,
                    offset: None,
                    message: err.to_string(),
                });
                continue;
            }
        };
        let file_len = metadata.len();
        let inode = inode_from_metadata(&metadata);
        let mtime = metadata
            .modified()
            .ok()
            .map(|time| DateTime::<Utc>::from(time).to_rfc3339());
        let cursor = db.get_cursor(&file_path)?;
        let start_offset = match cursor {
            Some(cursor) if cursor.byte_offset <= file_len && inode == cursor.inode => {
                cursor.byte_offset
            }
            _ => 0,
        };
        if start_offset >= file_len {
            stats.files_skipped += 1;
            continue;
        }
        tasks.push(FileTask {
            path: path.to_path_buf(),
            file_path,
            inode,
            mtime,
            start_offset,
        });
    }

    let parsed_files = tasks.into_par_iter().map(parse_file).collect::<Vec<_>>();

    let mut outcome = IngestOutcome::default();
    for parsed in parsed_files {
        stats.bytes_read += parsed.bytes_read;
        stats.lines_rejected += parsed
            .batch
            .issues
            .iter()
            .filter(|issue| issue.offset.is_some())
            .count();
        stats.issues.extend(parsed.batch.issues);
        if parsed.skipped {
            stats.files_skipped += 1;
            continue;
        }
        let events = db.insert_usage_events(&parsed.batch.events, &parsed.file_path)?;
        let messages = db.insert_chat_messages(&parsed.batch.messages, &parsed.file_path)?;
        stats.events_inserted += events.len();
        stats.messages_inserted += messages.len();
        outcome.events.extend(events);
        outcome.messages.extend(messages);
        db.upsert_cursor(&IngestCursor {
            file_path: parsed.file_path,
            inode: parsed.inode,
            mtime: parsed.mtime,
            byte_offset: parsed.start_offset.saturating_add(parsed.bytes_read),
            updated_at: Utc::now().to_rfc3339(),
        })?;
    }

    info!(
        files = stats.files_scanned,
        skipped = stats.files_skipped,
        events = stats.events_inserted,
        messages = stats.messages_inserted,
        rejected = stats.lines_rejected,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "ingest finished"
    );
    outcome.stats = stats;
    Ok(outcome)
}

fn inode_from_metadata(metadata: &fs::Metadata) -> Option<u64> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Some(metadata.ino())
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        None
    }
}
