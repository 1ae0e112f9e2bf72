use crate::error::Result;
use crate::services::{SharedConfig, open_db};
use meter_core::{LatencyEstimate, LatencyEstimator, TimeRange};

#[derive(Clone)]
pub struct LatencyService {
    config: SharedConfig,
}

impl LatencyService {
    pub(super) fn new(config: SharedConfig) -> Self {
        Self { config }
    }

    pub fn estimate(&self, range: Option<&TimeRange>) -> Result<LatencyEstimate> {
        let db = open_db(&self.config)?;
        let messages = db.list_chat_messages(range)?;
        let estimator = LatencyEstimator::new(self.config.settings.latency);
        Ok(estimator.estimate(&messages))
    }
}
