//! Approximate time-to-first-token derived from full-turn timings.
//!
//! Only the time between a user message and the assistant reply is observable.
//! The estimate scales that full-turn time by a fixed fraction and clamps it to
//! a floor. It is a heuristic, not a measurement, and every estimate says so
//! through its `basis` field.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Other,
}

impl ChatRole {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Self::User,
            "assistant" | "ai" => Self::Assistant,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChatMessage {
    #[serde(default, alias = "messageId")]
    pub message_id: Option<String>,
    #[serde(default, alias = "conversationId")]
    pub conversation_id: Option<String>,
    #[serde(default, alias = "sender")]
    pub role: Option<String>,
    #[serde(default, alias = "timestamp", alias = "createdAt")]
    pub ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub role: ChatRole,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub conversation_id: String,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyHeuristic {
    /// Fraction of the full turn attributed to time-to-first-token.
    pub scale: f64,
    pub floor_ms: f64,
    /// Turns longer than this are treated as unpaired and dropped.
    pub ceiling_secs: f64,
}

impl Default for LatencyHeuristic {
    fn default() -> Self {
        Self {
            scale: 0.2,
            floor_ms: 500.0,
            ceiling_secs: 300.0,
        }
    }
}

impl LatencyHeuristic {
    pub fn scaled_ms(&self, elapsed_seconds: f64) -> f64 {
        (elapsed_seconds * 1000.0 * self.scale).max(self.floor_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyBasis {
    ScaledFullTurn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyEstimate {
    pub avg_response_time_ms: f64,
    pub sample_count: u64,
    pub basis: LatencyBasis,
}

impl LatencyEstimate {
    pub fn empty() -> Self {
        Self {
            avg_response_time_ms: 0.0,
            sample_count: 0,
            basis: LatencyBasis::ScaledFullTurn,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LatencyEstimator {
    heuristic: LatencyHeuristic,
}

impl LatencyEstimator {
    pub fn new(heuristic: LatencyHeuristic) -> Self {
        Self { heuristic }
    }

    pub fn heuristic(&self) -> LatencyHeuristic {
        self.heuristic
    }

    /// Pairs each user message with the next assistant message in the same
    /// conversation. Messages must be in chronological order.
    pub fn pair_samples(&self, messages: &[ChatMessage]) -> Vec<LatencySample> {
        let mut pending: HashMap<&str, DateTime<Utc>> = HashMap::new();
        let mut samples = Vec::new();
        for message in messages {
            match message.role {
                ChatRole::User => {
                    pending.insert(message.conversation_id.as_str(), message.ts);
                }
                ChatRole::Assistant => {
                    let Some(asked_at) = pending.get(message.conversation_id.as_str()) else {
                        continue;
                    };
                    let elapsed = (message.ts - *asked_at).num_milliseconds() as f64 / 1000.0;
                    if elapsed < 0.0 || elapsed > self.heuristic.ceiling_secs {
                        continue;
                    }
                    pending.remove(message.conversation_id.as_str());
                    samples.push(LatencySample {
                        conversation_id: message.conversation_id.clone(),
                        elapsed_seconds: elapsed,
                    });
                }
                ChatRole::Other => {}
            }
        }
        samples
    }

    pub fn estimate(&self, messages: &[ChatMessage]) -> LatencyEstimate {
        let samples = self.pair_samples(messages);
        if samples.is_empty() {
            return LatencyEstimate::empty();
        }
        let total: f64 = samples
            .iter()
            .map(|sample| self.heuristic.scaled_ms(sample.elapsed_seconds))
            .sum();
        LatencyEstimate {
            avg_response_time_ms: total / samples.len() as f64,
            sample_count: samples.len() as u64,
            basis: LatencyBasis::ScaledFullTurn,
        }
    }
}
