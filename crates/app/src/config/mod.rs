use meter_core::{LatencyHeuristic, PricePair};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_WINDOW_DAYS: u32 = 30;
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Tunables shared by every service.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeterSettings {
    pub default_price: PricePair,
    pub top_n: usize,
    pub window_days: u32,
    pub retention_days: u32,
    pub latency: LatencyHeuristic,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            default_price: PricePair::FALLBACK,
            top_n: DEFAULT_TOP_N,
            window_days: DEFAULT_WINDOW_DAYS,
            retention_days: DEFAULT_RETENTION_DAYS,
            latency: LatencyHeuristic::default(),
        }
    }
}

/// Per-request overrides for a rollup report.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ReportParams {
    pub dimension: Option<String>,
    pub top: Option<usize>,
    pub days: Option<u32>,
}
