use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::pricing::PricingResolver;
use crate::types::{PriceSource, PricedTransaction, ResolvedPrice, TokenType, UsageEvent};

/// Decimal places for a single transaction's presented cost.
pub const TRANSACTION_COST_DECIMALS: u32 = 6;
/// Decimal places for presented aggregate sums.
pub const AGGREGATE_COST_DECIMALS: u32 = 4;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

pub fn cost_for_tokens(tokens: u64, price_per_1m: f64) -> f64 {
    if tokens == 0 || !price_per_1m.is_finite() || price_per_1m <= 0.0 {
        return 0.0;
    }
    (tokens as f64 / TOKENS_PER_UNIT) * price_per_1m
}

pub fn round_usd(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Prices one event against an already resolved price. Unrounded.
pub fn price_with(event: UsageEvent, price: &ResolvedPrice) -> PricedTransaction {
    let (input_cost_usd, output_cost_usd) = match event.token_type {
        TokenType::Prompt => (cost_for_tokens(event.token_count, price.input_per_1m), 0.0),
        TokenType::Completion => (0.0, cost_for_tokens(event.token_count, price.output_per_1m)),
    };
    PricedTransaction {
        event,
        input_cost_usd,
        output_cost_usd,
        total_cost_usd: input_cost_usd + output_cost_usd,
        price_source: price.source,
    }
}

pub struct CostCalculator {
    resolver: Arc<PricingResolver>,
}

impl CostCalculator {
    pub fn new(resolver: Arc<PricingResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &PricingResolver {
        &self.resolver
    }

    pub fn price(&self, event: UsageEvent) -> PricedTransaction {
        let resolved = self.resolver.resolve(&event.model);
        price_with(event, &resolved)
    }

    pub fn price_all(&self, events: Vec<UsageEvent>) -> Vec<PricedTransaction> {
        events.into_iter().map(|event| self.price(event)).collect()
    }

    /// Per-transaction audit rows with costs rounded for display.
    pub fn detailed(&self, events: Vec<UsageEvent>) -> Vec<TransactionDetail> {
        events
            .into_iter()
            .map(|event| TransactionDetail::from(self.price(event)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub message_id: String,
    pub subject_id: String,
    pub model: String,
    pub token_type: TokenType,
    pub token_count: u64,
    pub ts: String,
    pub cost_usd: f64,
    pub price_source: PriceSource,
}

impl From<PricedTransaction> for TransactionDetail {
    fn from(transaction: PricedTransaction) -> Self {
        let cost_usd = round_usd(transaction.total_cost_usd, TRANSACTION_COST_DECIMALS);
        let event = transaction.event;
        Self {
            message_id: event.message_id,
            subject_id: event.subject_id,
            model: event.model,
            token_type: event.token_type,
            token_count: event.token_count,
            ts: event.ts.to_rfc3339(),
            cost_usd,
            price_source: transaction.price_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PriceCatalog;
    use crate::types::{PriceEntry, Provider};
    use chrono::{TimeZone, Utc};

    fn calculator() -> CostCalculator {
        let catalog = PriceCatalog::from_entries(vec![PriceEntry::new(
            "gpt-4.1",
            Provider::OpenAi,
            3.70,
            11.10,
        )]);
        CostCalculator::new(Arc::new(PricingResolver::new(Arc::new(catalog))))
    }

    fn event(model: &str, token_type: TokenType, tokens: u64) -> UsageEvent {
        UsageEvent {
            subject_id: "u1".to_string(),
            model: model.to_string(),
            token_type,
            token_count: tokens,
            ts: Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap(),
            conversation_id: "c1".to_string(),
            message_id: "m1".to_string(),
        }
    }

    #[test]
    fn prompt_tokens_use_input_price() {
        let priced = calculator().price(event("gpt-4.1", TokenType::Prompt, 2_000_000));
        assert!((priced.total_cost_usd - 7.40).abs() < 1e-9);
        assert!((priced.input_cost_usd - 7.40).abs() < 1e-9);
        assert_eq!(priced.output_cost_usd, 0.0);
        assert_eq!(priced.price_source, PriceSource::Exact);
    }

    #[test]
    fn completion_tokens_use_output_price() {
        let priced = calculator().price(event("gpt-4.1", TokenType::Completion, 500_000));
        assert!((priced.total_cost_usd - 5.55).abs() < 1e-9);
        assert_eq!(priced.input_cost_usd, 0.0);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        let priced = calculator().price(event("gpt-4.1", TokenType::Prompt, 0));
        assert_eq!(priced.total_cost_usd, 0.0);
    }

    #[test]
    fn unknown_model_is_priced_at_default() {
        let priced = calculator().price(event("mystery", TokenType::Completion, 1_000_000));
        assert_eq!(priced.price_source, PriceSource::Default);
        assert!((priced.total_cost_usd - 15.0).abs() < 1e-9);
    }

    #[test]
    fn detail_rounds_to_six_decimals() {
        let rows = calculator().detailed(vec![event("gpt-4.1", TokenType::Prompt, 1)]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cost_usd, 0.000004);
        assert_eq!(rows[0].price_source, PriceSource::Exact);
    }

    #[test]
    fn round_usd_handles_non_finite() {
        assert_eq!(round_usd(f64::NAN, 4), 0.0);
        assert_eq!(round_usd(1.23456, 4), 1.2346);
    }
}
