use std::path::PathBuf;

use crate::Result;

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub app_data_dir: PathBuf,
    pub db_path: PathBuf,
    pub pricing_defaults_path: PathBuf,
    /// Directory scanned for `.jsonl` event files.
    pub events_dir: PathBuf,
}

impl AppPaths {
    pub fn new(app_data_dir: PathBuf) -> Self {
        let db_path = app_data_dir.join("usage-meter.sqlite");
        let pricing_defaults_path = app_data_dir.join("usage-meter-pricing.json");
        let events_dir = app_data_dir.join("events");
        Self {
            app_data_dir,
            db_path,
            pricing_defaults_path,
            events_dir,
        }
    }
}

pub fn ensure_app_data_dir(paths: &AppPaths) -> Result<()> {
    std::fs::create_dir_all(&paths.app_data_dir)?;
    std::fs::create_dir_all(&paths.events_dir)?;
    Ok(())
}
