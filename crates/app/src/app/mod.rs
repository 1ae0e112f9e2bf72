use std::path::PathBuf;

use tracing::warn;

use crate::config::MeterSettings;
use crate::error::{AppError, Result};
use crate::pricing;
use crate::services::AppServices;
use crate::startup::AppPaths;
use meter_db::Db;

/// Paths and tunables needed to run the meter.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub pricing_defaults_path: PathBuf,
    pub events_dir: PathBuf,
    pub settings: MeterSettings,
}

impl AppConfig {
    pub fn from_paths(paths: &AppPaths, settings: MeterSettings) -> Self {
        Self {
            db_path: paths.db_path.clone(),
            pricing_defaults_path: paths.pricing_defaults_path.clone(),
            events_dir: paths.events_dir.clone(),
            settings,
        }
    }
}

/// Application state shared by frontends.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub services: AppServices,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let services = AppServices::new(&config);
        Self { config, services }
    }

    pub fn is_fresh_db(&self) -> bool {
        !self.config.db_path.exists()
    }

    pub fn setup_db(&self) -> Result<()> {
        setup_db(&self.config.db_path)
    }

    /// Migrates, seeds an empty catalog, and rebuilds rollups from the
    /// stored event log.
    pub fn initialize(&self) -> Result<()> {
        self.setup_db()
            .map_err(|err| AppError::Message(format!("initialize db: {}", err)))?;
        if self.open_db()?.count_price_entries()? == 0 {
            self.apply_pricing_defaults()?;
        }
        if let Err(err) = self.sync_pricing_defaults() {
            warn!(error = %err, "failed to sync pricing defaults");
        }
        self.services.analytics.rebuild(true)?;
        Ok(())
    }

    pub fn open_db(&self) -> Result<Db> {
        Ok(Db::open(&self.config.db_path)?)
    }

    pub fn apply_pricing_defaults(&self) -> Result<usize> {
        pricing::apply_pricing_defaults(&self.config.db_path, &self.config.pricing_defaults_path)
    }

    pub fn sync_pricing_defaults(&self) -> Result<()> {
        pricing::sync_pricing_defaults(&self.config.db_path, &self.config.pricing_defaults_path)
    }
}

pub fn setup_db(path: &std::path::Path) -> Result<()> {
    let mut db = Db::open(path)?;
    db.migrate()?;
    Ok(())
}
