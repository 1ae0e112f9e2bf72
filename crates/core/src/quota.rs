use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::types::cost_to_decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Month,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" => Some(Self::Day),
            "month" => Some(Self::Month),
            _ => None,
        }
    }
}

/// First day of the period containing `ts` (UTC).
pub fn period_start(ts: DateTime<Utc>, period: Period) -> NaiveDate {
    let day = ts.date_naive();
    match period {
        Period::Day => day,
        Period::Month => day.with_day(1).unwrap_or(day),
    }
}

/// First day after the period that starts on `start`.
pub fn period_end(start: NaiveDate, period: Period) -> NaiveDate {
    match period {
        Period::Day => start.succ_opt().unwrap_or(start),
        Period::Month => start
            .checked_add_months(Months::new(1))
            .unwrap_or(start),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub subject_id: String,
    pub period: Period,
    pub start: NaiveDate,
}

impl PeriodKey {
    pub fn for_ts(subject_id: &str, period: Period, ts: DateTime<Utc>) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            period,
            start: period_start(ts, period),
        }
    }
}

/// Per-subject limits. `None` means the quantity is not limited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaLimits {
    #[serde(default)]
    pub daily_token_limit: Option<u64>,
    #[serde(default)]
    pub daily_message_limit: Option<u64>,
    #[serde(default)]
    pub monthly_budget: Option<f64>,
}

impl QuotaLimits {
    pub fn is_unlimited(&self) -> bool {
        self.daily_token_limit.is_none()
            && self.daily_message_limit.is_none()
            && self.monthly_budget.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaDelta {
    pub tokens: u64,
    pub messages: u64,
    pub cost_usd: f64,
}

impl QuotaDelta {
    pub fn new(tokens: u64, messages: u64, cost_usd: f64) -> Self {
        Self {
            tokens,
            messages,
            cost_usd,
        }
    }

    /// Same delta with a cost that cannot move a counter backwards.
    pub fn sanitized(self) -> Self {
        let cost_usd = if self.cost_usd.is_finite() && self.cost_usd > 0.0 {
            self.cost_usd
        } else {
            0.0
        };
        Self { cost_usd, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserQuotaState {
    pub subject_id: String,
    pub period: Period,
    pub period_start: NaiveDate,
    pub tokens_used: u64,
    pub messages_used: u64,
    /// Summed on the same fixed decimal scale as rollup costs, so a run of
    /// charges that adds up to the budget leaves exactly zero remaining.
    pub spend_used: Decimal,
    pub limits: QuotaLimits,
}

impl UserQuotaState {
    pub fn zeroed(key: &PeriodKey, limits: QuotaLimits) -> Self {
        Self {
            subject_id: key.subject_id.clone(),
            period: key.period,
            period_start: key.start,
            tokens_used: 0,
            messages_used: 0,
            spend_used: Decimal::ZERO,
            limits,
        }
    }

    pub fn key(&self) -> PeriodKey {
        PeriodKey {
            subject_id: self.subject_id.clone(),
            period: self.period,
            start: self.period_start,
        }
    }

    pub fn apply(&mut self, delta: QuotaDelta, limits: QuotaLimits) {
        let delta = delta.sanitized();
        self.tokens_used = self.tokens_used.saturating_add(delta.tokens);
        self.messages_used = self.messages_used.saturating_add(delta.messages);
        self.spend_used += cost_to_decimal(delta.cost_usd);
        self.limits = limits;
    }

    pub fn period_end(&self) -> NaiveDate {
        period_end(self.period_start, self.period)
    }

    pub fn spend_usd(&self) -> f64 {
        self.spend_used.to_f64().unwrap_or_default()
    }
}

/// Both period buckets touched by one `record` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedUsage {
    pub daily: UserQuotaState,
    pub monthly: UserQuotaState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaCheck {
    pub subject_id: String,
    pub within_limits: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_tokens_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_messages_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_budget_remaining: Option<f64>,
}

impl QuotaCheck {
    /// `daily` and `monthly` are the current buckets, if any usage exists yet.
    pub fn evaluate(
        subject_id: &str,
        limits: &QuotaLimits,
        daily: Option<&UserQuotaState>,
        monthly: Option<&UserQuotaState>,
    ) -> Self {
        let tokens_used = daily.map(|state| state.tokens_used).unwrap_or(0);
        let messages_used = daily.map(|state| state.messages_used).unwrap_or(0);
        let spend_used = monthly
            .map(|state| state.spend_used)
            .unwrap_or(Decimal::ZERO);

        let daily_tokens_remaining = limits
            .daily_token_limit
            .map(|limit| limit.saturating_sub(tokens_used));
        let daily_messages_remaining = limits
            .daily_message_limit
            .map(|limit| limit.saturating_sub(messages_used));
        let monthly_budget_remaining = limits
            .monthly_budget
            .map(|budget| (cost_to_decimal(budget) - spend_used).max(Decimal::ZERO));

        let within_limits = daily_tokens_remaining.is_none_or(|left| left > 0)
            && daily_messages_remaining.is_none_or(|left| left > 0)
            && monthly_budget_remaining.is_none_or(|left| left > Decimal::ZERO);

        Self {
            subject_id: subject_id.to_string(),
            within_limits,
            daily_tokens_remaining,
            daily_messages_remaining,
            monthly_budget_remaining: monthly_budget_remaining
                .map(|left| left.to_f64().unwrap_or_default()),
        }
    }
}

/// Storage for per-period quota buckets.
///
/// `increment` must be atomic per key: concurrent calls for the same
/// subject and period may never lose an update.
pub trait QuotaStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Adds `delta` to the bucket for `key`, creating a zeroed bucket first if
    /// none exists. `limits` are the subject's limits at the time of the call.
    fn increment(
        &self,
        key: &PeriodKey,
        delta: QuotaDelta,
        limits: QuotaLimits,
    ) -> Result<UserQuotaState, Self::Error>;

    /// Adds `delta` to a day bucket and its month bucket. Stores that can
    /// write both in one transaction override this so a failure leaves
    /// neither bucket changed.
    fn increment_pair(
        &self,
        day: &PeriodKey,
        month: &PeriodKey,
        delta: QuotaDelta,
        limits: QuotaLimits,
    ) -> Result<(UserQuotaState, UserQuotaState), Self::Error> {
        let daily = self.increment(day, delta, limits)?;
        let monthly = self.increment(month, delta, limits)?;
        Ok((daily, monthly))
    }

    fn load(&self, key: &PeriodKey) -> Result<Option<UserQuotaState>, Self::Error>;

    /// Removes buckets whose period ended on or before `cutoff`.
    fn purge_before(&self, cutoff: NaiveDate) -> Result<usize, Self::Error>;
}

/// Source of the currently configured limits for a subject.
pub trait LimitsSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn limits_for(&self, subject_id: &str) -> Result<QuotaLimits, Self::Error>;
}
