use std::path::PathBuf;

use chrono::NaiveDate;
use meter_core::{Period, PeriodKey, QuotaDelta, QuotaLimits, QuotaStore, UserQuotaState};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use crate::Db;
use crate::error::{DbError, Result};
use crate::helpers::{
    format_date, format_decimal, now_ts, parse_date, parse_decimal, row_to_limits, to_sql_count,
};

/// Upper bound on optimistic retries for one increment.
const MAX_QUOTA_ATTEMPTS: u32 = 64;

impl Db {
    /// Adds `delta` to the bucket for `key` using a version check. A writer
    /// that loses the race re-reads the row and tries again.
    pub fn increment_quota(
        &self,
        key: &PeriodKey,
        delta: QuotaDelta,
        limits: QuotaLimits,
    ) -> Result<UserQuotaState> {
        increment_on(&self.conn, key, delta.sanitized(), limits)
    }

    /// Adds `delta` to the day and month buckets inside one write
    /// transaction. Either both buckets move or neither does.
    pub fn increment_quota_pair(
        &mut self,
        day: &PeriodKey,
        month: &PeriodKey,
        delta: QuotaDelta,
        limits: QuotaLimits,
    ) -> Result<(UserQuotaState, UserQuotaState)> {
        let delta = delta.sanitized();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let daily = increment_on(&tx, day, delta, limits)?;
        let monthly = increment_on(&tx, month, delta, limits)?;
        tx.commit()?;
        Ok((daily, monthly))
    }

    pub fn load_quota(&self, key: &PeriodKey) -> Result<Option<UserQuotaState>> {
        Ok(load_versioned(&self.conn, key)?.map(|(state, _)| state))
    }

    pub fn list_quota_states(&self, subject_id: &str) -> Result<Vec<UserQuotaState>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT subject_id, period, period_start, tokens_used, messages_used, spend_used,
                   daily_token_limit, daily_message_limit, monthly_budget, version
            FROM quota_state
            WHERE subject_id = ?1
            ORDER BY period ASC, period_start DESC
            "#,
        )?;
        let rows = stmt
            .query_map(params![subject_id], quota_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|row| row.into_state().map(|(state, _)| state))
            .collect()
    }

    /// Deletes buckets whose period ended on or before `cutoff`.
    pub fn purge_quota_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM quota_state WHERE period_end <= ?1",
            params![format_date(cutoff)],
        )?;
        info!(removed, %cutoff, "purged elapsed quota buckets");
        Ok(removed)
    }
}

fn increment_on(
    conn: &Connection,
    key: &PeriodKey,
    delta: QuotaDelta,
    limits: QuotaLimits,
) -> Result<UserQuotaState> {
    let period_start = format_date(key.start);
    for attempt in 1..=MAX_QUOTA_ATTEMPTS {
        ensure_row(conn, key, &limits)?;
        let Some((current, version)) = load_versioned(conn, key)? else {
            continue;
        };
        let mut next = current;
        next.apply(delta, limits);
        let changed = conn.execute(
            r#"
            UPDATE quota_state
            SET tokens_used = ?1,
                messages_used = ?2,
                spend_used = ?3,
                daily_token_limit = ?4,
                daily_message_limit = ?5,
                monthly_budget = ?6,
                version = version + 1,
                updated_at = ?7
            WHERE subject_id = ?8 AND period = ?9 AND period_start = ?10 AND version = ?11
            "#,
            params![
                to_sql_count(next.tokens_used),
                to_sql_count(next.messages_used),
                format_decimal(next.spend_used),
                limits.daily_token_limit.map(to_sql_count),
                limits.daily_message_limit.map(to_sql_count),
                limits.monthly_budget,
                now_ts(),
                key.subject_id,
                key.period.as_str(),
                period_start,
                version
            ],
        )?;
        if changed == 1 {
            return Ok(next);
        }
        debug!(
            subject = key.subject_id.as_str(),
            period = key.period.as_str(),
            attempt,
            "quota version mismatch; retrying"
        );
    }
    Err(DbError::Conflict {
        subject: key.subject_id.clone(),
        attempts: MAX_QUOTA_ATTEMPTS,
    })
}

fn ensure_row(conn: &Connection, key: &PeriodKey, limits: &QuotaLimits) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR IGNORE INTO quota_state (
          subject_id, period, period_start, period_end, tokens_used, messages_used,
          spend_used, daily_token_limit, daily_message_limit, monthly_budget, version,
          updated_at
        ) VALUES (
          ?1, ?2, ?3, ?4, 0, 0, '0', ?5, ?6, ?7, 0, ?8
        )
        "#,
        params![
            key.subject_id,
            key.period.as_str(),
            format_date(key.start),
            format_date(meter_core::period_end(key.start, key.period)),
            limits.daily_token_limit.map(to_sql_count),
            limits.daily_message_limit.map(to_sql_count),
            limits.monthly_budget,
            now_ts()
        ],
    )?;
    Ok(())
}

fn load_versioned(conn: &Connection, key: &PeriodKey) -> Result<Option<(UserQuotaState, i64)>> {
    let row = conn
        .query_row(
            r#"
            SELECT subject_id, period, period_start, tokens_used, messages_used, spend_used,
                   daily_token_limit, daily_message_limit, monthly_budget, version
            FROM quota_state
            WHERE subject_id = ?1 AND period = ?2 AND period_start = ?3
            "#,
            params![key.subject_id, key.period.as_str(), format_date(key.start)],
            quota_row,
        )
        .optional()?;
    row.map(QuotaRow::into_state).transpose()
}

struct QuotaRow {
    subject_id: String,
    period: String,
    period_start: String,
    tokens_used: i64,
    messages_used: i64,
    spend_used: String,
    limits: QuotaLimits,
    version: i64,
}

impl QuotaRow {
    fn into_state(self) -> Result<(UserQuotaState, i64)> {
        let period =
            Period::parse(&self.period).ok_or_else(|| DbError::InvalidValue(self.period.clone()))?;
        Ok((
            UserQuotaState {
                subject_id: self.subject_id,
                period,
                period_start: parse_date(&self.period_start)?,
                tokens_used: self.tokens_used.max(0) as u64,
                messages_used: self.messages_used.max(0) as u64,
                spend_used: parse_decimal(&self.spend_used)?,
                limits: self.limits,
            },
            self.version,
        ))
    }
}

fn quota_row(row: &rusqlite::Row<'_>) -> std::result::Result<QuotaRow, rusqlite::Error> {
    Ok(QuotaRow {
        subject_id: row.get(0)?,
        period: row.get(1)?,
        period_start: row.get(2)?,
        tokens_used: row.get(3)?,
        messages_used: row.get(4)?,
        spend_used: row.get(5)?,
        limits: row_to_limits(row, 6)?,
        version: row.get(9)?,
    })
}

/// Quota buckets in SQLite. Each call opens its own connection so the store
/// can be shared across threads and processes.
#[derive(Debug, Clone)]
pub struct SqliteQuotaStore {
    path: PathBuf,
}

impl SqliteQuotaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl QuotaStore for SqliteQuotaStore {
    type Error = DbError;

    fn increment(
        &self,
        key: &PeriodKey,
        delta: QuotaDelta,
        limits: QuotaLimits,
    ) -> Result<UserQuotaState> {
        Db::open(&self.path)?.increment_quota(key, delta, limits)
    }

    fn increment_pair(
        &self,
        day: &PeriodKey,
        month: &PeriodKey,
        delta: QuotaDelta,
        limits: QuotaLimits,
    ) -> Result<(UserQuotaState, UserQuotaState)> {
        Db::open(&self.path)?.increment_quota_pair(day, month, delta, limits)
    }

    fn load(&self, key: &PeriodKey) -> Result<Option<UserQuotaState>> {
        Db::open(&self.path)?.load_quota(key)
    }

    fn purge_before(&self, cutoff: NaiveDate) -> Result<usize> {
        Db::open(&self.path)?.purge_quota_before(cutoff)
    }
}
