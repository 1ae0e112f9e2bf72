use std::path::PathBuf;

use meter_core::{LimitsSource, QuotaLimits};
use rusqlite::{OptionalExtension, params};

use crate::Db;
use crate::error::{DbError, Result};
use crate::helpers::{now_ts, row_to_limits, to_sql_count};
use crate::types::SubjectLimits;

impl Db {
    pub fn set_subject_limits(&self, subject_id: &str, limits: &QuotaLimits) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO subject_limits (
              subject_id, daily_token_limit, daily_message_limit, monthly_budget, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(subject_id) DO UPDATE SET
              daily_token_limit = excluded.daily_token_limit,
              daily_message_limit = excluded.daily_message_limit,
              monthly_budget = excluded.monthly_budget,
              updated_at = excluded.updated_at
            "#,
            params![
                subject_id,
                limits.daily_token_limit.map(to_sql_count),
                limits.daily_message_limit.map(to_sql_count),
                limits.monthly_budget,
                now_ts()
            ],
        )?;
        Ok(())
    }

    pub fn clear_subject_limits(&self, subject_id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM subject_limits WHERE subject_id = ?1",
            params![subject_id],
        )?;
        Ok(removed > 0)
    }

    pub fn subject_limits(&self, subject_id: &str) -> Result<Option<QuotaLimits>> {
        let limits = self
            .conn
            .query_row(
                r#"
                SELECT daily_token_limit, daily_message_limit, monthly_budget
                FROM subject_limits
                WHERE subject_id = ?1
                "#,
                params![subject_id],
                |row| row_to_limits(row, 0),
            )
            .optional()?;
        Ok(limits)
    }

    pub fn list_subject_limits(&self) -> Result<Vec<SubjectLimits>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT subject_id, daily_token_limit, daily_message_limit, monthly_budget, updated_at
            FROM subject_limits
            ORDER BY subject_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SubjectLimits {
                    subject_id: row.get(0)?,
                    limits: row_to_limits(row, 1)?,
                    updated_at: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Limits table read through a fresh connection per lookup, so changes made
/// by other processes are seen on the next call.
#[derive(Debug, Clone)]
pub struct SqliteLimits {
    path: PathBuf,
}

impl SqliteLimits {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LimitsSource for SqliteLimits {
    type Error = DbError;

    fn limits_for(&self, subject_id: &str) -> Result<QuotaLimits> {
        let db = Db::open(&self.path)?;
        Ok(db.subject_limits(subject_id)?.unwrap_or_default())
    }
}
