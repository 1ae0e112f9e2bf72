use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::cost::AGGREGATE_COST_DECIMALS;
use crate::pricing::provider_for_model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Prompt,
    Completion,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Completion => "completion",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "prompt" => Some(Self::Prompt),
            "completion" => Some(Self::Completion),
            _ => None,
        }
    }
}

/// A validated per-message token count. Produced upstream, priced once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub subject_id: String,
    pub model: String,
    pub token_type: TokenType,
    pub token_count: u64,
    pub ts: DateTime<Utc>,
    pub conversation_id: String,
    pub message_id: String,
}

/// Usage event as delivered by an event source, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUsageEvent {
    #[serde(default, alias = "subjectId", alias = "user")]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "tokenType")]
    pub token_type: Option<String>,
    #[serde(default, alias = "tokenCount")]
    pub token_count: Option<i64>,
    /// Signed ledger amount; spend is recorded as a negative number. Only its
    /// magnitude is used, and only when `token_count` is absent.
    #[serde(default, alias = "rawAmount")]
    pub raw_amount: Option<i64>,
    #[serde(default, alias = "timestamp", alias = "createdAt")]
    pub ts: Option<String>,
    #[serde(default, alias = "conversationId")]
    pub conversation_id: Option<String>,
    #[serde(default, alias = "messageId")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    Mistral,
    Cohere,
    Other,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Mistral => "mistral",
            Self::Cohere => "cohere",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Self::OpenAi,
            "anthropic" => Self::Anthropic,
            "google" => Self::Google,
            "mistral" => Self::Mistral,
            "cohere" => Self::Cohere,
            _ => Self::Other,
        }
    }
}

/// Catalog row: unit prices per one million tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub model_id: String,
    pub provider: Provider,
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

impl PriceEntry {
    pub fn new(model_id: &str, provider: Provider, input_per_1m: f64, output_per_1m: f64) -> Self {
        Self {
            model_id: model_id.to_string(),
            provider,
            input_per_1m,
            output_per_1m,
        }
    }

    pub(crate) fn has_valid_prices(&self) -> bool {
        self.input_per_1m.is_finite()
            && self.output_per_1m.is_finite()
            && self.input_per_1m >= 0.0
            && self.output_per_1m >= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePair {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

impl PricePair {
    /// Price applied when neither the catalog nor a provider family matches.
    pub const FALLBACK: PricePair = PricePair {
        input_per_1m: 5.0,
        output_per_1m: 15.0,
    };
}

impl Default for PricePair {
    fn default() -> Self {
        Self::FALLBACK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Exact,
    ProviderFallback,
    Default,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::ProviderFallback => "provider_fallback",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
    pub source: PriceSource,
    /// Catalog model id whose prices were used, if any.
    pub matched_model: Option<String>,
}

impl ResolvedPrice {
    pub(crate) fn from_entry(entry: &PriceEntry, source: PriceSource) -> Self {
        Self {
            input_per_1m: entry.input_per_1m,
            output_per_1m: entry.output_per_1m,
            source,
            matched_model: Some(entry.model_id.clone()),
        }
    }

    pub(crate) fn fallback(price: PricePair) -> Self {
        Self {
            input_per_1m: price.input_per_1m,
            output_per_1m: price.output_per_1m,
            source: PriceSource::Default,
            matched_model: None,
        }
    }
}

/// One usage event with its cost attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedTransaction {
    pub event: UsageEvent,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
    pub price_source: PriceSource,
}

impl PricedTransaction {
    pub fn tokens_in(&self) -> u64 {
        match self.event.token_type {
            TokenType::Prompt => self.event.token_count,
            TokenType::Completion => 0,
        }
    }

    pub fn tokens_out(&self) -> u64 {
        match self.event.token_type {
            TokenType::Prompt => 0,
            TokenType::Completion => self.event.token_count,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.event.ts.date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Model,
    Subject,
    Day,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Model, Dimension::Subject, Dimension::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Subject => "subject",
            Self::Day => "day",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "model" => Some(Self::Model),
            "subject" | "user" => Some(Self::Subject),
            "day" | "date" => Some(Self::Day),
            _ => None,
        }
    }

    pub fn key_for(&self, transaction: &PricedTransaction) -> String {
        match self {
            Self::Model => transaction.event.model.clone(),
            Self::Subject => transaction.event.subject_id.clone(),
            Self::Day => transaction.day().format(DAY_KEY_FORMAT).to_string(),
        }
    }
}

pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Accumulated usage for one dimension key.
///
/// Cost is held as an exact decimal so the stored value does not depend on the
/// order transactions were folded in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupBucket {
    pub dimension: Dimension,
    pub key: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: Decimal,
    pub event_count: u64,
}

impl RollupBucket {
    pub fn empty(dimension: Dimension, key: String) -> Self {
        Self {
            dimension,
            key,
            tokens_in: 0,
            tokens_out: 0,
            cost: Decimal::ZERO,
            event_count: 0,
        }
    }

    pub fn fold(&mut self, transaction: &PricedTransaction) {
        self.tokens_in = self.tokens_in.saturating_add(transaction.tokens_in());
        self.tokens_out = self.tokens_out.saturating_add(transaction.tokens_out());
        self.cost += cost_to_decimal(transaction.total_cost_usd);
        self.event_count += 1;
    }

    pub fn day(&self) -> Option<NaiveDate> {
        match self.dimension {
            Dimension::Day => NaiveDate::parse_from_str(&self.key, DAY_KEY_FORMAT).ok(),
            _ => None,
        }
    }

    /// Unrounded cost as a float.
    pub fn cost_usd(&self) -> f64 {
        self.cost.to_f64().unwrap_or_default()
    }

    pub fn rounded_cost_usd(&self) -> f64 {
        round_decimal(self.cost, AGGREGATE_COST_DECIMALS)
    }

    pub fn summary(&self) -> BucketSummary {
        BucketSummary {
            dimension: self.dimension,
            key: self.key.clone(),
            tokens_in: self.tokens_in,
            tokens_out: self.tokens_out,
            cost_usd: self.rounded_cost_usd(),
            event_count: self.event_count,
            provider: match self.dimension {
                Dimension::Model => Some(provider_for_model(&self.key)),
                _ => None,
            },
        }
    }
}

/// Exported view of a bucket with the cost rounded for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub dimension: Dimension,
    pub key: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub event_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub total_transactions: u64,
    pub average_cost_per_transaction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// The last `days` UTC calendar days ending at `end` (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub end: NaiveDate,
    pub days: u32,
}

impl DayWindow {
    pub fn new(end: NaiveDate, days: u32) -> Self {
        Self { end, days }
    }

    pub fn ending_today(days: u32) -> Self {
        Self::new(Utc::now().date_naive(), days)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        if self.days == 0 || day > self.end {
            return false;
        }
        let span = self.end.signed_duration_since(day).num_days();
        span < i64::from(self.days)
    }
}

pub(crate) fn cost_to_decimal(value: f64) -> Decimal {
    if !value.is_finite() || value <= 0.0 {
        return Decimal::ZERO;
    }
    Decimal::from_f64_retain(value)
        .map(|exact| exact.round_dp(COST_SCALE))
        .unwrap_or(Decimal::ZERO)
}

// Fixed scale for accumulated costs. Keeps every addend on the same scale so
// bucket sums are exact and independent of fold order.
const COST_SCALE: u32 = 15;

pub(crate) fn round_decimal(value: Decimal, decimals: u32) -> f64 {
    value
        .round_dp_with_strategy(
            decimals,
            rust_decimal::RoundingStrategy::MidpointAwayFromZero,
        )
        .to_f64()
        .unwrap_or_default()
}
