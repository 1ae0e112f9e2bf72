#![allow(dead_code)]

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use meter_core::{ChatMessage, ChatRole, PriceEntry, Provider, TokenType, UsageEvent};
use meter_db::Db;
use tempfile::TempDir;

pub struct TestDb {
    pub _dir: TempDir,
    pub db: Db,
    pub path: PathBuf,
}

pub fn setup_db() -> TestDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("test.sqlite");
    let mut db = Db::open(&path).expect("open db");
    db.migrate().expect("migrate db");
    TestDb {
        _dir: dir,
        db,
        path,
    }
}

pub fn ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("timestamp")
        .with_timezone(&Utc)
}

pub fn make_event(
    message_id: &str,
    subject: &str,
    model: &str,
    token_type: TokenType,
    tokens: u64,
    at: &str,
) -> UsageEvent {
    UsageEvent {
        subject_id: subject.to_string(),
        model: model.to_string(),
        token_type,
        token_count: tokens,
        ts: ts(at),
        conversation_id: format!("conv-{subject}"),
        message_id: message_id.to_string(),
    }
}

pub fn make_message(message_id: &str, conversation: &str, role: ChatRole, at: &str) -> ChatMessage {
    ChatMessage {
        message_id: message_id.to_string(),
        conversation_id: conversation.to_string(),
        role,
        ts: ts(at),
    }
}

pub fn seed_catalog(db: &mut Db) {
    db.replace_price_entries(&[
        PriceEntry::new("gpt-4.1", Provider::OpenAi, 3.70, 11.10),
        PriceEntry::new("gpt-9-stable", Provider::OpenAi, 8.0, 24.0),
        PriceEntry::new("claude-3-opus", Provider::Anthropic, 15.0, 75.0),
    ])
    .expect("replace pricing");
}
