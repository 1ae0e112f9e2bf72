use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use crate::config::ReportParams;
use crate::error::{AppError, Result};
use crate::services::{SharedConfig, open_db};
use crate::util::time::window_for_days;
use meter_core::{
    BucketSummary, CostCalculator, Dimension, PricedTransaction, PricingResolver, TimeRange,
    TransactionDetail, UsageEvent, UsageSummary,
};
use meter_db::Db;
use meter_engine::{AggregationEngine, SnapshotQuery};

/// Live rollups over the stored event log.
#[derive(Clone)]
pub struct AnalyticsService {
    config: SharedConfig,
    calculator: Arc<CostCalculator>,
    engine: Arc<AggregationEngine>,
}

impl AnalyticsService {
    pub(super) fn new(config: SharedConfig, resolver: Arc<PricingResolver>) -> Self {
        Self {
            config,
            calculator: Arc::new(CostCalculator::new(resolver)),
            engine: Arc::new(AggregationEngine::new()),
        }
    }

    fn db(&self) -> Result<Db> {
        open_db(&self.config)
    }

    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    /// Prices a batch against one in-memory read of the catalog instead of a
    /// SQLite lookup per event.
    fn batch_calculator(&self, db: &Db) -> Result<CostCalculator> {
        let catalog = Arc::new(db.catalog_snapshot()?);
        let resolver =
            PricingResolver::new(catalog).with_default_price(self.config.settings.default_price);
        Ok(CostCalculator::new(Arc::new(resolver)))
    }

    /// Re-prices every stored event and rebuilds the rollups from empty.
    pub fn rebuild(&self, parallel: bool) -> Result<usize> {
        let db = self.db()?;
        let events = db.list_usage_events(None)?;
        let transactions = self.batch_calculator(&db)?.price_all(events);
        self.engine.replay(&transactions, parallel);
        info!(
            transactions = transactions.len(),
            buckets = self.engine.len(),
            "rebuilt rollups"
        );
        Ok(transactions.len())
    }

    /// Prices newly stored events and folds them into the live rollups.
    pub fn fold_events(&self, db: &Db, events: Vec<UsageEvent>) -> Result<Vec<PricedTransaction>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let transactions = self.batch_calculator(db)?.price_all(events);
        self.engine.fold_parallel(&transactions);
        Ok(transactions)
    }

    /// Prices a single event with direct catalog lookups.
    pub fn price(&self, event: UsageEvent) -> PricedTransaction {
        self.calculator.price(event)
    }

    /// Top buckets for one dimension. The day dimension is limited to the
    /// configured window unless `days` is given.
    pub fn report(&self, params: &ReportParams, today: NaiveDate) -> Result<Vec<BucketSummary>> {
        let dimension = match params.dimension.as_deref() {
            Some(value) => Dimension::parse(value).ok_or_else(|| {
                AppError::InvalidInput(format!("unsupported dimension {}", value))
            })?,
            None => Dimension::Model,
        };
        let settings = &self.config.settings;
        let mut query =
            SnapshotQuery::new(dimension).top(params.top.unwrap_or(settings.top_n));
        let days = match (params.days, dimension) {
            (Some(days), _) => Some(days),
            (None, Dimension::Day) => Some(settings.window_days),
            (None, _) => None,
        };
        if let Some(days) = days {
            query = query.within(window_for_days(today, days)?);
        }
        Ok(self
            .engine
            .snapshot(&query)
            .iter()
            .map(|bucket| bucket.summary())
            .collect())
    }

    pub fn summary(&self) -> UsageSummary {
        self.engine.summary()
    }

    /// Day buckets for the chart view, oldest first.
    pub fn daily_series(&self, days: Option<u32>, today: NaiveDate) -> Result<Vec<BucketSummary>> {
        let window = window_for_days(today, days.unwrap_or(self.config.settings.window_days))?;
        Ok(self
            .engine
            .daily_series(window)
            .iter()
            .map(|bucket| bucket.summary())
            .collect())
    }

    pub fn transactions(&self, range: &TimeRange) -> Result<Vec<TransactionDetail>> {
        let db = self.db()?;
        let events = db.list_usage_events(Some(range))?;
        Ok(self.batch_calculator(&db)?.detailed(events))
    }
}
