use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::latency::{ChatMessage, ChatRole, RawChatMessage};
use crate::types::{RawUsageEvent, TokenType, UsageEvent};

/// Reasons an event is rejected at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEvent {
    #[error("missing subject id")]
    MissingSubject,
    #[error("missing model")]
    MissingModel,
    #[error("negative token count {0}")]
    NegativeTokenCount(i64),
    #[error("unknown token type {0:?}")]
    UnknownTokenType(String),
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("missing conversation id")]
    MissingConversation,
}

pub fn validate_event(raw: RawUsageEvent) -> Result<UsageEvent, MalformedEvent> {
    let subject_id = required(raw.subject_id).ok_or(MalformedEvent::MissingSubject)?;
    let model = required(raw.model).ok_or(MalformedEvent::MissingModel)?;
    let token_type = match raw.token_type {
        Some(value) => {
            TokenType::parse(&value).ok_or(MalformedEvent::UnknownTokenType(value))?
        }
        None => return Err(MalformedEvent::UnknownTokenType(String::new())),
    };
    let token_count = match (raw.token_count, raw.raw_amount) {
        (Some(count), _) if count < 0 => return Err(MalformedEvent::NegativeTokenCount(count)),
        (Some(count), _) => count as u64,
        (None, Some(amount)) => amount.unsigned_abs(),
        (None, None) => 0,
    };
    let ts = parse_timestamp(raw.ts)?;
    Ok(UsageEvent {
        subject_id,
        model,
        token_type,
        token_count,
        ts,
        conversation_id: raw.conversation_id.unwrap_or_default().trim().to_string(),
        message_id: raw.message_id.unwrap_or_default().trim().to_string(),
    })
}

pub fn validate_message(raw: RawChatMessage) -> Result<ChatMessage, MalformedEvent> {
    let conversation_id =
        required(raw.conversation_id).ok_or(MalformedEvent::MissingConversation)?;
    let ts = parse_timestamp(raw.ts)?;
    Ok(ChatMessage {
        message_id: raw.message_id.unwrap_or_default().trim().to_string(),
        conversation_id,
        role: raw
            .role
            .as_deref()
            .map(ChatRole::parse)
            .unwrap_or(ChatRole::Other),
        ts,
    })
}

pub fn parse_timestamp(value: Option<String>) -> Result<DateTime<Utc>, MalformedEvent> {
    let value = required(value).ok_or(MalformedEvent::MissingTimestamp)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| MalformedEvent::InvalidTimestamp(value))
}

fn required(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawUsageEvent {
        RawUsageEvent {
            subject_id: Some("user-1".to_string()),
            model: Some("gpt-4.1".to_string()),
            token_type: Some("prompt".to_string()),
            token_count: Some(120),
            raw_amount: None,
            ts: Some("2025-06-01T10:00:00+02:00".to_string()),
            conversation_id: Some("conv-1".to_string()),
            message_id: Some("msg-1".to_string()),
        }
    }

    #[test]
    fn accepts_well_formed_event_and_normalizes_to_utc() {
        let event = validate_event(raw()).expect("valid");
        assert_eq!(event.token_type, TokenType::Prompt);
        assert_eq!(event.token_count, 120);
        assert_eq!(event.ts.to_rfc3339(), "2025-06-01T08:00:00+00:00");
    }

    #[test]
    fn rejects_blank_subject_and_missing_model() {
        let mut event = raw();
        event.subject_id = Some("   ".to_string());
        assert_eq!(validate_event(event), Err(MalformedEvent::MissingSubject));

        let mut event = raw();
        event.model = None;
        assert_eq!(validate_event(event), Err(MalformedEvent::MissingModel));
    }

    #[test]
    fn rejects_negative_token_count() {
        let mut event = raw();
        event.token_count = Some(-5);
        assert_eq!(
            validate_event(event),
            Err(MalformedEvent::NegativeTokenCount(-5))
        );
    }

    #[test]
    fn missing_token_count_is_zero() {
        let mut event = raw();
        event.token_count = None;
        assert_eq!(validate_event(event).expect("valid").token_count, 0);
    }

    #[test]
    fn negative_raw_amount_counts_its_magnitude() {
        let mut event = raw();
        event.token_count = None;
        event.raw_amount = Some(-1200);
        assert_eq!(validate_event(event).expect("valid").token_count, 1200);
    }

    #[test]
    fn explicit_token_count_wins_over_raw_amount() {
        let mut event = raw();
        event.raw_amount = Some(-1200);
        assert_eq!(validate_event(event).expect("valid").token_count, 120);

        let mut event = raw();
        event.token_count = Some(-3);
        event.raw_amount = Some(-1200);
        assert_eq!(
            validate_event(event),
            Err(MalformedEvent::NegativeTokenCount(-3))
        );
    }

    #[test]
    fn rejects_unknown_token_type_and_bad_timestamp() {
        let mut event = raw();
        event.token_type = Some("image".to_string());
        assert_eq!(
            validate_event(event),
            Err(MalformedEvent::UnknownTokenType("image".to_string()))
        );

        let mut event = raw();
        event.ts = Some("yesterday".to_string());
        assert_eq!(
            validate_event(event),
            Err(MalformedEvent::InvalidTimestamp("yesterday".to_string()))
        );
    }

    #[test]
    fn raw_event_accepts_camel_case_fields() {
        let raw: RawUsageEvent = serde_json::from_str(
            r#"{"user":"u1","model":"claude-3","tokenType":"completion","rawAmount":7,"createdAt":"2025-01-01T00:00:00Z","conversationId":"c","messageId":"m"}"#,
        )
        .expect("parse");
        let event = validate_event(raw).expect("valid");
        assert_eq!(event.subject_id, "u1");
        assert_eq!(event.token_type, TokenType::Completion);
        assert_eq!(event.token_count, 7);
    }
}
