use std::sync::Arc;

use tracing::warn;

use crate::error::{AppError, Result};
use crate::pricing;
use crate::services::{SharedConfig, open_db};
use meter_core::{PriceEntry, PricingResolver, ResolvedPrice};
use meter_db::Db;

#[derive(Clone)]
pub struct PricingService {
    config: SharedConfig,
    resolver: Arc<PricingResolver>,
}

impl PricingService {
    pub(super) fn new(config: SharedConfig, resolver: Arc<PricingResolver>) -> Self {
        Self { config, resolver }
    }

    fn db(&self) -> Result<Db> {
        open_db(&self.config)
    }

    pub fn list_entries(&self) -> Result<Vec<PriceEntry>> {
        let db = self.db()?;
        Ok(db.list_price_entries()?)
    }

    pub fn replace_entries(&self, entries: &[PriceEntry]) -> Result<usize> {
        for entry in entries {
            validate_entry(entry)?;
        }
        let mut db = self.db()?;
        let updated = db.replace_price_entries(entries)?;
        if let Err(err) = pricing::write_pricing_defaults(&self.config.pricing_defaults_path, entries)
        {
            warn!(error = %err, "failed to update pricing defaults");
        }
        Ok(updated)
    }

    /// Shows which step of the cascade prices `model_id`.
    pub fn resolve(&self, model_id: &str) -> Result<ResolvedPrice> {
        if model_id.trim().is_empty() {
            return Err(AppError::InvalidInput("model id is required".to_string()));
        }
        Ok(self.resolver.resolve(model_id))
    }
}

fn validate_entry(entry: &PriceEntry) -> Result<()> {
    if entry.model_id.trim().is_empty() {
        return Err(AppError::InvalidInput("model id is required".to_string()));
    }
    let valid = |price: f64| price.is_finite() && price >= 0.0;
    if !valid(entry.input_per_1m) || !valid(entry.output_per_1m) {
        return Err(AppError::InvalidInput(format!(
            "invalid prices for {}",
            entry.model_id
        )));
    }
    Ok(())
}
