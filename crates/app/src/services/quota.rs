use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::services::{SharedConfig, open_db};
use crate::util::time::retention_cutoff;
use meter_core::{
    PricedTransaction, QuotaCheck, QuotaLimits, RecordedUsage, TokenType, UserQuotaState,
};
use meter_db::{Db, SqliteLimits, SqliteQuotaStore, SubjectLimits};
use meter_engine::QuotaEnforcer;

type SqliteEnforcer = QuotaEnforcer<SqliteQuotaStore, SqliteLimits>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubjectLimitsView {
    pub subject_id: String,
    #[serde(flatten)]
    pub limits: QuotaLimits,
    pub updated_at: String,
}

impl From<SubjectLimits> for SubjectLimitsView {
    fn from(value: SubjectLimits) -> Self {
        Self {
            subject_id: value.subject_id,
            limits: value.limits,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct QuotaService {
    config: SharedConfig,
    enforcer: Arc<SqliteEnforcer>,
}

impl QuotaService {
    pub(super) fn new(config: SharedConfig) -> Self {
        let enforcer = QuotaEnforcer::new(
            SqliteQuotaStore::new(config.db_path.clone()),
            SqliteLimits::new(config.db_path.clone()),
        );
        Self {
            config,
            enforcer: Arc::new(enforcer),
        }
    }

    fn db(&self) -> Result<Db> {
        open_db(&self.config)
    }

    pub fn check(&self, subject_id: &str) -> Result<QuotaCheck> {
        self.check_at(subject_id, Utc::now())
    }

    pub fn check_at(&self, subject_id: &str, at: DateTime<Utc>) -> Result<QuotaCheck> {
        require_subject(subject_id)?;
        Ok(self.enforcer.check_at(subject_id, at)?)
    }

    /// Counts one message per prompt event; completions add tokens and spend.
    pub fn record(&self, transaction: &PricedTransaction) -> Result<RecordedUsage> {
        let event = &transaction.event;
        let messages = match event.token_type {
            TokenType::Prompt => 1,
            TokenType::Completion => 0,
        };
        Ok(self.enforcer.record(
            &event.subject_id,
            event.token_count,
            messages,
            transaction.total_cost_usd,
            event.ts,
        )?)
    }

    pub fn record_all(&self, transactions: &[PricedTransaction]) -> Result<usize> {
        for transaction in transactions {
            self.record(transaction)?;
        }
        Ok(transactions.len())
    }

    pub fn set_limits(&self, subject_id: &str, limits: QuotaLimits) -> Result<()> {
        require_subject(subject_id)?;
        let invalid = |budget: &f64| !budget.is_finite() || *budget < 0.0;
        if let Some(budget) = limits.monthly_budget.filter(invalid) {
            return Err(AppError::InvalidInput(format!(
                "invalid monthly budget {}",
                budget
            )));
        }
        let db = self.db()?;
        db.set_subject_limits(subject_id, &limits)?;
        Ok(())
    }

    pub fn clear_limits(&self, subject_id: &str) -> Result<()> {
        let db = self.db()?;
        if db.clear_subject_limits(subject_id)? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("no limits for {}", subject_id)))
        }
    }

    pub fn list_limits(&self) -> Result<Vec<SubjectLimitsView>> {
        let db = self.db()?;
        Ok(db
            .list_subject_limits()?
            .into_iter()
            .map(SubjectLimitsView::from)
            .collect())
    }

    pub fn states(&self, subject_id: &str) -> Result<Vec<UserQuotaState>> {
        let db = self.db()?;
        Ok(db.list_quota_states(subject_id)?)
    }

    /// Drops buckets that ended more than the retention period before `today`.
    pub fn purge(&self, today: NaiveDate) -> Result<usize> {
        let cutoff = retention_cutoff(today, self.config.settings.retention_days)?;
        Ok(self.enforcer.purge_before(cutoff)?)
    }
}

fn require_subject(subject_id: &str) -> Result<()> {
    if subject_id.trim().is_empty() {
        return Err(AppError::InvalidInput("subject id is required".to_string()));
    }
    Ok(())
}
