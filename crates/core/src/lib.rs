pub mod cost;
pub mod latency;
pub mod pricing;
pub mod quota;
pub mod types;
pub mod validate;

pub use cost::{
    AGGREGATE_COST_DECIMALS, CostCalculator, TRANSACTION_COST_DECIMALS, TransactionDetail,
    cost_for_tokens, price_with, round_usd,
};
pub use latency::{
    ChatMessage, ChatRole, LatencyBasis, LatencyEstimate, LatencyEstimator, LatencyHeuristic,
    LatencySample, RawChatMessage,
};
pub use pricing::{
    CatalogError, ExactMatch, PriceCatalog, PricingCatalog, PricingResolver, ProviderFamily,
    ResolveStrategy, provider_for_model,
};
pub use quota::{
    LimitsSource, Period, PeriodKey, QuotaCheck, QuotaDelta, QuotaLimits, QuotaStore, RecordedUsage,
    UserQuotaState, period_end, period_start,
};
pub use types::{
    BucketSummary, DAY_KEY_FORMAT, DayWindow, Dimension, PriceEntry, PricePair, PriceSource,
    PricedTransaction, Provider, RawUsageEvent, ResolvedPrice, RollupBucket, TimeRange,
    TokenType, UsageEvent, UsageSummary,
};
pub use validate::{MalformedEvent, parse_timestamp, validate_event, validate_message};
