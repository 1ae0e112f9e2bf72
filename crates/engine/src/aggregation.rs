use std::cmp::Ordering;

use dashmap::DashMap;
use meter_core::{
    AGGREGATE_COST_DECIMALS, DayWindow, Dimension, PricedTransaction, RollupBucket, UsageSummary,
};
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotQuery {
    pub dimension: Dimension,
    /// Maximum number of buckets returned. `None` returns every bucket.
    pub top_n: Option<usize>,
    /// Restricts day buckets to a trailing window. Ignored for other dimensions.
    pub window: Option<DayWindow>,
}

impl SnapshotQuery {
    pub fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            top_n: None,
            window: None,
        }
    }

    pub fn top(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }

    pub fn within(mut self, window: DayWindow) -> Self {
        self.window = Some(window);
        self
    }
}

/// Folds priced transactions into per-dimension rollup buckets.
///
/// Buckets live in a sharded map; each fold holds the shard lock of the bucket
/// it updates, so concurrent folds on the same key never lose an increment and
/// snapshots never see a half-applied update.
pub struct AggregationEngine {
    dimensions: Vec<Dimension>,
    buckets: DashMap<(Dimension, String), RollupBucket>,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregationEngine {
    pub fn new() -> Self {
        Self::with_dimensions(&Dimension::ALL)
    }

    pub fn with_dimensions(dimensions: &[Dimension]) -> Self {
        let mut active = dimensions.to_vec();
        active.sort();
        active.dedup();
        Self {
            dimensions: active,
            buckets: DashMap::new(),
        }
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn fold(&self, transaction: &PricedTransaction) {
        for dimension in &self.dimensions {
            let key = dimension.key_for(transaction);
            self.buckets
                .entry((*dimension, key.clone()))
                .or_insert_with(|| RollupBucket::empty(*dimension, key))
                .fold(transaction);
        }
    }

    pub fn fold_all(&self, transactions: &[PricedTransaction]) {
        for transaction in transactions {
            self.fold(transaction);
        }
    }

    pub fn fold_parallel(&self, transactions: &[PricedTransaction]) {
        transactions
            .par_iter()
            .for_each(|transaction| self.fold(transaction));
    }

    /// Rebuilds every bucket from an empty state.
    pub fn replay(&self, transactions: &[PricedTransaction], parallel: bool) {
        self.buckets.clear();
        if parallel {
            self.fold_parallel(transactions);
        } else {
            self.fold_all(transactions);
        }
        debug!(
            transactions = transactions.len(),
            buckets = self.buckets.len(),
            parallel,
            "replayed rollups"
        );
    }

    pub fn bucket(&self, dimension: Dimension, key: &str) -> Option<RollupBucket> {
        self.buckets
            .get(&(dimension, key.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn snapshot(&self, query: &SnapshotQuery) -> Vec<RollupBucket> {
        let window = match query.dimension {
            Dimension::Day => query.window,
            _ => None,
        };
        let mut buckets = self.collect(query.dimension, |bucket| match window {
            Some(window) => bucket.day().is_some_and(|day| window.contains(day)),
            None => true,
        });
        buckets.sort_by(rank);
        if let Some(top_n) = query.top_n {
            buckets.truncate(top_n);
        }
        buckets
    }

    /// Day buckets inside `window`, oldest first.
    pub fn daily_series(&self, window: DayWindow) -> Vec<RollupBucket> {
        let mut buckets = self.collect(Dimension::Day, |bucket| {
            bucket.day().is_some_and(|day| window.contains(day))
        });
        buckets.sort_by(|a, b| a.key.cmp(&b.key));
        buckets
    }

    pub fn summary(&self) -> UsageSummary {
        let Some(dimension) = self.dimensions.first().copied() else {
            return UsageSummary::default();
        };
        let buckets = self.collect(dimension, |_| true);
        let mut tokens_in = 0u64;
        let mut tokens_out = 0u64;
        let mut events = 0u64;
        let mut cost = Decimal::ZERO;
        for bucket in &buckets {
            tokens_in = tokens_in.saturating_add(bucket.tokens_in);
            tokens_out = tokens_out.saturating_add(bucket.tokens_out);
            events += bucket.event_count;
            cost += bucket.cost;
        }
        let average = if events == 0 {
            Decimal::ZERO
        } else {
            cost / Decimal::from(events)
        };
        UsageSummary {
            total_input_tokens: tokens_in,
            total_output_tokens: tokens_out,
            total_tokens: tokens_in.saturating_add(tokens_out),
            total_cost_usd: present(cost),
            total_transactions: events,
            average_cost_per_transaction: present(average),
        }
    }

    fn collect<F>(&self, dimension: Dimension, keep: F) -> Vec<RollupBucket>
    where
        F: Fn(&RollupBucket) -> bool,
    {
        self.buckets
            .iter()
            .filter(|entry| entry.key().0 == dimension)
            .map(|entry| entry.value().clone())
            .filter(|bucket| keep(bucket))
            .collect()
    }
}

fn rank(a: &RollupBucket, b: &RollupBucket) -> Ordering {
    b.cost
        .cmp(&a.cost)
        .then_with(|| b.event_count.cmp(&a.event_count))
        .then_with(|| a.key.cmp(&b.key))
}

fn present(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(AGGREGATE_COST_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or_default()
}
