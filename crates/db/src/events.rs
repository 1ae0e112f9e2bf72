use meter_core::{ChatMessage, ChatRole, TimeRange, TokenType, UsageEvent};
use rusqlite::params;

use crate::Db;
use crate::error::{DbError, Result};
use crate::helpers::{format_ts, parse_ts, to_sql_count};

const OPEN_START: &str = "0000";
const OPEN_END: &str = "9999";

impl Db {
    /// Stores events, skipping ones already present. Returns only the events
    /// that were newly written.
    pub fn insert_usage_events(
        &mut self,
        events: &[UsageEvent],
        source: &str,
    ) -> Result<Vec<UsageEvent>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let tx = self.conn.transaction()?;
        let mut inserted = Vec::new();
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO usage_event (
                  message_id, token_type, subject_id, model, token_count, ts,
                  conversation_id, source
                ) VALUES (
                  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                )
                "#,
            )?;
            for event in events {
                let rows = stmt.execute(params![
                    event.message_id,
                    event.token_type.as_str(),
                    event.subject_id,
                    event.model,
                    to_sql_count(event.token_count),
                    format_ts(event.ts),
                    event.conversation_id,
                    source,
                ])?;
                if rows > 0 {
                    inserted.push(event.clone());
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn insert_chat_messages(
        &mut self,
        messages: &[ChatMessage],
        source: &str,
    ) -> Result<Vec<ChatMessage>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let tx = self.conn.transaction()?;
        let mut inserted = Vec::new();
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO chat_message (
                  message_id, conversation_id, role, ts, source
                ) VALUES (
                  ?1, ?2, ?3, ?4, ?5
                )
                "#,
            )?;
            for message in messages {
                let rows = stmt.execute(params![
                    message.message_id,
                    message.conversation_id,
                    message.role.as_str(),
                    format_ts(message.ts),
                    source,
                ])?;
                if rows > 0 {
                    inserted.push(message.clone());
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Usage events in time order. `None` returns the whole log.
    pub fn list_usage_events(&self, range: Option<&TimeRange>) -> Result<Vec<UsageEvent>> {
        let (start, end) = range_bounds(range);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT message_id, token_type, subject_id, model, token_count, ts, conversation_id
            FROM usage_event
            WHERE ts >= ?1 AND ts < ?2
            ORDER BY ts ASC, message_id ASC, token_type ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(
                |(message_id, token_type, subject_id, model, token_count, ts, conversation_id)| {
                    Ok(UsageEvent {
                        subject_id,
                        model,
                        token_type: TokenType::parse(&token_type)
                            .ok_or(DbError::InvalidValue(token_type))?,
                        token_count: token_count.max(0) as u64,
                        ts: parse_ts(&ts)?,
                        conversation_id,
                        message_id,
                    })
                },
            )
            .collect()
    }

    /// Chat messages in time order, ready for latency pairing.
    pub fn list_chat_messages(&self, range: Option<&TimeRange>) -> Result<Vec<ChatMessage>> {
        let (start, end) = range_bounds(range);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT message_id, conversation_id, role, ts
            FROM chat_message
            WHERE ts >= ?1 AND ts < ?2
            ORDER BY ts ASC, message_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(message_id, conversation_id, role, ts)| {
                Ok(ChatMessage {
                    message_id,
                    conversation_id,
                    role: ChatRole::parse(&role),
                    ts: parse_ts(&ts)?,
                })
            })
            .collect()
    }

    pub fn count_usage_events(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM usage_event", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn range_bounds(range: Option<&TimeRange>) -> (String, String) {
    match range {
        Some(range) => (format_ts(range.start), format_ts(range.end)),
        None => (OPEN_START.to_string(), OPEN_END.to_string()),
    }
}
