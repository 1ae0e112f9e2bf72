use std::fmt::Write as _;
use std::io::BufRead;

use meter_core::{
    ChatMessage, MalformedEvent, RawChatMessage, RawUsageEvent, UsageEvent, validate_event,
    validate_message,
};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{IngestIssue, ParsedBatch};

/// Outcome of reading one line of an event file.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Usage(UsageEvent),
    Message(ChatMessage),
    Rejected(String),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Usage,
    Message,
}

/// Parses one JSONL line. `source` and the line's byte `offset` seed the id
/// hash for records that carry no message id of their own, so repeated
/// identical lines stay distinct while a re-read of the same line maps to
/// the same id.
pub fn parse_line(line: &str, source: &str, offset: u64) -> ParsedLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ParsedLine::Ignored;
    }
    let Some(value) = parse_json_line(trimmed) else {
        return ParsedLine::Rejected("invalid json".to_string());
    };
    let Some(kind) = line_kind(&value) else {
        return ParsedLine::Ignored;
    };
    match kind {
        LineKind::Usage => match serde_json::from_value::<RawUsageEvent>(value) {
            Ok(raw) => match validate_event(raw) {
                Ok(mut event) => {
                    if event.message_id.is_empty() {
                        event.message_id = hash_line(source, offset, trimmed);
                    }
                    ParsedLine::Usage(event)
                }
                Err(err) => rejected(err),
            },
            Err(err) => ParsedLine::Rejected(err.to_string()),
        },
        LineKind::Message => match serde_json::from_value::<RawChatMessage>(value) {
            Ok(raw) => match validate_message(raw) {
                Ok(mut message) => {
                    if message.message_id.is_empty() {
                        message.message_id = hash_line(source, offset, trimmed);
                    }
                    ParsedLine::Message(message)
                }
                Err(err) => rejected(err),
            },
            Err(err) => ParsedLine::Rejected(err.to_string()),
        },
    }
}

/// Reads every line from `reader`. Read errors end the batch with an issue.
pub fn events_from_reader<R: BufRead>(mut reader: R, source: &str) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    let mut buf = String::new();
    let mut offset = 0u64;
    loop {
        buf.clear();
        match reader.read_line(&mut buf) {
            Ok(0) => break,
            Ok(bytes) => {
                record_line(&mut batch, &buf, source, offset);
                offset = offset.saturating_add(bytes as u64);
            }
            Err(err) => {
                batch.issues.push(IngestIssue {
                    file_path: source.to_string(),
                    offset: Some(offset),
                    message: err.to_string(),
                });
                break;
            }
        }
    }
    batch
}

pub(crate) fn record_line(batch: &mut ParsedBatch, line: &str, source: &str, offset: u64) {
    match parse_line(line, source, offset) {
        ParsedLine::Usage(event) => batch.events.push(event),
        ParsedLine::Message(message) => batch.messages.push(message),
        ParsedLine::Rejected(message) => batch.issues.push(IngestIssue {
            file_path: source.to_string(),
            offset: Some(offset),
            message,
        }),
        ParsedLine::Ignored => {}
    }
}

pub(crate) fn parse_json_line(line: &str) -> Option<Value> {
    serde_json::from_str::<Value>(line)
        .ok()
        .filter(Value::is_object)
}

fn line_kind(value: &Value) -> Option<LineKind> {
    match value.get("type").and_then(Value::as_str) {
        Some("usage") | Some("transaction") => return Some(LineKind::Usage),
        Some("message") => return Some(LineKind::Message),
        Some(_) => return None,
        None => {}
    }
    let has = |keys: &[&str]| keys.iter().any(|key| value.get(*key).is_some());
    if has(&["token_type", "tokenType"]) {
        Some(LineKind::Usage)
    } else if has(&["role", "sender"]) {
        Some(LineKind::Message)
    } else {
        None
    }
}

fn rejected(err: MalformedEvent) -> ParsedLine {
    ParsedLine::Rejected(format!("malformed event: {err}"))
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{:02x}", byte);
    }
    out
}

fn hash_line(source: &str, offset: u64, line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(offset.to_le_bytes());
    hasher.update(b":");
    hasher.update(line.as_bytes());
    hex_digest(&hasher.finalize())
}
