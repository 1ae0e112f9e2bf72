use serde::Serialize;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::services::{AnalyticsService, QuotaService, SharedConfig, open_db};
use ingest::IngestStats;
use meter_core::{PricedTransaction, RawUsageEvent, validate_event};
use meter_db::Db;

const DIRECT_SOURCE: &str = "direct";

#[derive(Clone, Debug, Serialize)]
pub struct IngestReport {
    #[serde(flatten)]
    pub stats: IngestStats,
    pub transactions_folded: usize,
    pub quota_records: usize,
}

/// Moves new events from disk into storage, rollups and quota counters.
#[derive(Clone)]
pub struct IngestService {
    config: SharedConfig,
    analytics: AnalyticsService,
    quota: QuotaService,
}

impl IngestService {
    pub(super) fn new(config: SharedConfig, analytics: AnalyticsService, quota: QuotaService) -> Self {
        Self {
            config,
            analytics,
            quota,
        }
    }

    fn db(&self) -> Result<Db> {
        open_db(&self.config)
    }

    pub fn run(&self) -> Result<IngestReport> {
        let mut db = self.db()?;
        let outcome = ingest::ingest_dir(&mut db, &self.config.events_dir)?;
        let transactions = self.analytics.fold_events(&db, outcome.events)?;
        let quota_records = self.quota.record_all(&transactions)?;
        Ok(IngestReport {
            stats: outcome.stats,
            transactions_folded: transactions.len(),
            quota_records,
        })
    }

    /// Validates and stores one event delivered outside the event files.
    /// Returns `None` when the event was already recorded.
    pub fn record(&self, raw: RawUsageEvent) -> Result<Option<PricedTransaction>> {
        let event = validate_event(raw)?;
        if event.message_id.is_empty() {
            return Err(AppError::InvalidInput("message id is required".to_string()));
        }
        let mut db = self.db()?;
        let mut inserted = db.insert_usage_events(&[event], DIRECT_SOURCE)?;
        let Some(event) = inserted.pop() else {
            debug!("event already recorded");
            return Ok(None);
        };
        let transaction = self.analytics.price(event);
        self.analytics.engine().fold(&transaction);
        self.quota.record(&transaction)?;
        Ok(Some(transaction))
    }
}
