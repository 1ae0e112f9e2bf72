use std::convert::Infallible;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use meter_core::{
    LimitsSource, Period, PeriodKey, QuotaCheck, QuotaDelta, QuotaLimits, QuotaStore,
    RecordedUsage, UserQuotaState,
};
use tracing::{debug, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("quota store error: {0}")]
    Store(#[source] BoxError),
    #[error("limits lookup failed for {subject}: {source}")]
    Limits {
        subject: String,
        #[source]
        source: BoxError,
    },
}

pub type Result<T> = std::result::Result<T, QuotaError>;

/// Per-subject usage counters checked against configured limits.
///
/// Limits are read from the source on every call. Each `record` increments
/// the day bucket and the month bucket for its timestamp through
/// `QuotaStore::increment_pair`; a timestamp in a newer period lands in a
/// fresh zeroed bucket.
pub struct QuotaEnforcer<S, L> {
    store: S,
    limits: L,
}

impl<S, L> QuotaEnforcer<S, L>
where
    S: QuotaStore,
    L: LimitsSource,
{
    pub fn new(store: S, limits: L) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn limits_source(&self) -> &L {
        &self.limits
    }

    pub fn record(
        &self,
        subject_id: &str,
        tokens: u64,
        messages: u64,
        cost_usd: f64,
        ts: DateTime<Utc>,
    ) -> Result<RecordedUsage> {
        let delta = QuotaDelta::new(tokens, messages, cost_usd);
        let sanitized = delta.sanitized();
        if sanitized.cost_usd != delta.cost_usd {
            warn!(subject = subject_id, cost_usd, "ignoring invalid cost delta");
        }
        let limits = self.limits(subject_id)?;
        let day_key = PeriodKey::for_ts(subject_id, Period::Day, ts);
        let month_key = PeriodKey::for_ts(subject_id, Period::Month, ts);
        let (daily, monthly) = self
            .store
            .increment_pair(&day_key, &month_key, sanitized, limits)
            .map_err(|err| QuotaError::Store(Box::new(err)))?;
        Ok(RecordedUsage { daily, monthly })
    }

    pub fn check(&self, subject_id: &str) -> Result<QuotaCheck> {
        self.check_at(subject_id, Utc::now())
    }

    pub fn check_at(&self, subject_id: &str, at: DateTime<Utc>) -> Result<QuotaCheck> {
        let limits = self.limits(subject_id)?;
        let daily = self.load(&PeriodKey::for_ts(subject_id, Period::Day, at))?;
        let monthly = self.load(&PeriodKey::for_ts(subject_id, Period::Month, at))?;
        Ok(QuotaCheck::evaluate(
            subject_id,
            &limits,
            daily.as_ref(),
            monthly.as_ref(),
        ))
    }

    pub fn state(
        &self,
        subject_id: &str,
        period: Period,
        at: DateTime<Utc>,
    ) -> Result<Option<UserQuotaState>> {
        self.load(&PeriodKey::for_ts(subject_id, period, at))
    }

    pub fn purge_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let removed = self
            .store
            .purge_before(cutoff)
            .map_err(|err| QuotaError::Store(Box::new(err)))?;
        debug!(removed, %cutoff, "purged quota buckets");
        Ok(removed)
    }

    fn limits(&self, subject_id: &str) -> Result<QuotaLimits> {
        self.limits
            .limits_for(subject_id)
            .map_err(|err| QuotaError::Limits {
                subject: subject_id.to_string(),
                source: Box::new(err),
            })
    }

    fn load(&self, key: &PeriodKey) -> Result<Option<UserQuotaState>> {
        self.store
            .load(key)
            .map_err(|err| QuotaError::Store(Box::new(err)))
    }
}

/// In-process quota buckets. Increments on one key are serialized by the
/// map's shard lock.
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    buckets: DashMap<PeriodKey, UserQuotaState>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl QuotaStore for MemoryQuotaStore {
    type Error = Infallible;

    fn increment(
        &self,
        key: &PeriodKey,
        delta: QuotaDelta,
        limits: QuotaLimits,
    ) -> std::result::Result<UserQuotaState, Infallible> {
        let mut entry = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| UserQuotaState::zeroed(key, limits));
        entry.apply(delta, limits);
        Ok(entry.value().clone())
    }

    fn load(&self, key: &PeriodKey) -> std::result::Result<Option<UserQuotaState>, Infallible> {
        Ok(self.buckets.get(key).map(|entry| entry.value().clone()))
    }

    fn purge_before(&self, cutoff: NaiveDate) -> std::result::Result<usize, Infallible> {
        let before = self.buckets.len();
        self.buckets.retain(|_, state| state.period_end() > cutoff);
        Ok(before.saturating_sub(self.buckets.len()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryLimits {
    limits: DashMap<String, QuotaLimits>,
}

impl MemoryLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, subject_id: &str, limits: QuotaLimits) {
        self.limits.insert(subject_id.to_string(), limits);
    }

    pub fn clear(&self, subject_id: &str) {
        self.limits.remove(subject_id);
    }
}

impl LimitsSource for MemoryLimits {
    type Error = Infallible;

    fn limits_for(&self, subject_id: &str) -> std::result::Result<QuotaLimits, Infallible> {
        Ok(self
            .limits
            .get(subject_id)
            .map(|entry| *entry.value())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn enforcer() -> QuotaEnforcer<MemoryQuotaStore, MemoryLimits> {
        QuotaEnforcer::new(MemoryQuotaStore::new(), MemoryLimits::new())
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn daily_token_limit_is_exhausted_exactly() {
        let quota = enforcer();
        quota.limits_source().set(
            "u1",
            QuotaLimits {
                daily_token_limit: Some(1000),
                ..QuotaLimits::default()
            },
        );
        quota.record("u1", 600, 1, 0.0, at(3, 9)).expect("record");
        quota.record("u1", 500, 1, 0.0, at(3, 15)).expect("record");

        let check = quota.check_at("u1", at(3, 18)).expect("check");
        assert_eq!(check.daily_tokens_remaining, Some(0));
        assert!(!check.within_limits);
        assert!(check.daily_messages_remaining.is_none());
    }

    #[test]
    fn record_increments_by_delta() {
        let quota = enforcer();
        let first = quota.record("u1", 10, 1, 0.5, at(3, 9)).expect("record");
        let second = quota.record("u1", 15, 2, 0.25, at(3, 10)).expect("record");
        assert_eq!(second.daily.tokens_used - first.daily.tokens_used, 15);
        assert_eq!(second.daily.messages_used - first.daily.messages_used, 2);
        assert!((second.monthly.spend_usd() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn new_day_starts_from_zero_but_month_carries() {
        let quota = enforcer();
        quota.record("u1", 900, 1, 1.0, at(3, 23)).expect("record");
        let next = quota.record("u1", 5, 1, 1.0, at(4, 0)).expect("record");
        assert_eq!(next.daily.tokens_used, 5);
        assert_eq!(next.daily.period_start, at(4, 0).date_naive());
        assert!((next.monthly.spend_usd() - 2.0).abs() < 1e-9);

        let earlier = quota
            .state("u1", Period::Day, at(3, 12))
            .expect("state")
            .expect("bucket");
        assert_eq!(earlier.tokens_used, 900);
    }

    #[test]
    fn new_month_starts_from_zero() {
        let quota = enforcer();
        quota.record("u1", 1, 1, 3.0, at(30, 12)).expect("record");
        let july = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let recorded = quota.record("u1", 1, 1, 1.0, july).expect("record");
        assert!((recorded.monthly.spend_usd() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn limits_are_reread_on_every_call() {
        let quota = enforcer();
        quota.record("u1", 100, 1, 0.0, at(3, 9)).expect("record");
        assert!(quota.check_at("u1", at(3, 10)).expect("check").within_limits);

        quota.limits_source().set(
            "u1",
            QuotaLimits {
                daily_token_limit: Some(100),
                ..QuotaLimits::default()
            },
        );
        assert!(!quota.check_at("u1", at(3, 10)).expect("check").within_limits);

        quota.limits_source().clear("u1");
        assert!(quota.check_at("u1", at(3, 10)).expect("check").within_limits);
    }

    #[test]
    fn monthly_budget_remaining_never_negative() {
        let quota = enforcer();
        quota.limits_source().set(
            "u1",
            QuotaLimits {
                monthly_budget: Some(1.0),
                ..QuotaLimits::default()
            },
        );
        quota.record("u1", 1, 1, 1.5, at(3, 9)).expect("record");
        let check = quota.check_at("u1", at(20, 9)).expect("check");
        assert_eq!(check.monthly_budget_remaining, Some(0.0));
        assert!(!check.within_limits);
    }

    #[test]
    fn ten_dime_charges_exhaust_a_one_dollar_budget() {
        let quota = enforcer();
        quota.limits_source().set(
            "u1",
            QuotaLimits {
                monthly_budget: Some(1.0),
                ..QuotaLimits::default()
            },
        );
        for hour in 0..10 {
            quota.record("u1", 1, 1, 0.1, at(3, hour)).expect("record");
        }
        let check = quota.check_at("u1", at(3, 12)).expect("check");
        assert_eq!(check.monthly_budget_remaining, Some(0.0));
        assert!(!check.within_limits);
    }

    #[test]
    fn invalid_cost_is_clamped() {
        let quota = enforcer();
        let recorded = quota.record("u1", 1, 1, f64::NAN, at(3, 9)).expect("record");
        assert_eq!(recorded.monthly.spend_usd(), 0.0);
        let recorded = quota.record("u1", 1, 1, -4.0, at(3, 9)).expect("record");
        assert_eq!(recorded.monthly.spend_usd(), 0.0);
        assert_eq!(recorded.daily.tokens_used, 2);
    }

    #[test]
    fn purge_drops_elapsed_buckets_only() {
        let quota = enforcer();
        quota.record("u1", 1, 1, 0.0, at(1, 9)).expect("record");
        quota.record("u1", 1, 1, 0.0, at(10, 9)).expect("record");
        assert_eq!(quota.store().len(), 3);

        let removed = quota
            .purge_before(at(5, 0).date_naive())
            .expect("purge");
        assert_eq!(removed, 1);
        assert!(quota.state("u1", Period::Day, at(1, 9)).expect("state").is_none());
        assert!(quota.state("u1", Period::Month, at(1, 9)).expect("state").is_some());
    }
}
