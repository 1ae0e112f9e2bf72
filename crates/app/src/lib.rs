pub mod app;
pub mod config;
pub mod error;
pub mod pricing;
pub mod services;
pub mod startup;
pub mod util;

pub use app::{AppConfig, AppState};
pub use config::{MeterSettings, ReportParams};
pub use error::{AppError, Result};
pub use pricing::{
    apply_pricing_defaults, load_initial_pricing, load_pricing_defaults, sync_pricing_defaults,
    write_pricing_defaults,
};
pub use services::{
    AnalyticsService, AppServices, IngestReport, IngestService, LatencyService, PricingService,
    QuotaService, SubjectLimitsView,
};
pub use startup::{AppPaths, ensure_app_data_dir};
pub use util::time::{parse_utc, range_for_days, retention_cutoff, window_for_days};
