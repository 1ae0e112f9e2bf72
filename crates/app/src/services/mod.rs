mod analytics;
mod ingest;
mod latency;
mod pricing;
mod quota;

use std::sync::Arc;

use crate::app::AppConfig;
use crate::error::Result;
use meter_core::PricingResolver;
use meter_db::{Db, SqliteCatalog};

pub use analytics::AnalyticsService;
pub use ingest::{IngestReport, IngestService};
pub use latency::LatencyService;
pub use pricing::PricingService;
pub use quota::{QuotaService, SubjectLimitsView};

type SharedConfig = Arc<AppConfig>;

/// Service registry for app-level operations.
#[derive(Clone)]
pub struct AppServices {
    pub analytics: AnalyticsService,
    pub ingest: IngestService,
    pub quota: QuotaService,
    pub pricing: PricingService,
    pub latency: LatencyService,
}

impl AppServices {
    pub fn new(config: &AppConfig) -> Self {
        let shared = Arc::new(config.clone());
        let catalog = Arc::new(SqliteCatalog::new(config.db_path.clone()));
        let resolver = Arc::new(
            PricingResolver::new(catalog).with_default_price(config.settings.default_price),
        );
        let analytics = AnalyticsService::new(shared.clone(), resolver.clone());
        let quota = QuotaService::new(shared.clone());
        Self {
            ingest: IngestService::new(shared.clone(), analytics.clone(), quota.clone()),
            pricing: PricingService::new(shared.clone(), resolver),
            latency: LatencyService::new(shared),
            analytics,
            quota,
        }
    }
}

fn open_db(config: &SharedConfig) -> Result<Db> {
    Ok(Db::open(&config.db_path)?)
}
