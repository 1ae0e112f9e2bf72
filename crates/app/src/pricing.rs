use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{AppError, Result};
use meter_core::PriceEntry;
use meter_db::Db;
use tracing::info;

/// Seeds the catalog from the defaults file, or the bundled list when no file
/// exists yet.
pub fn apply_pricing_defaults(db_path: &Path, defaults_path: &Path) -> Result<usize> {
    let entries = if defaults_path.exists() {
        load_pricing_defaults(defaults_path)?
    } else {
        load_initial_pricing()?
    };
    let mut db = Db::open(db_path)?;
    let written = db.replace_price_entries(&entries)?;
    info!(entries = written, "seeded pricing catalog");
    Ok(written)
}

/// Writes the current catalog back to the defaults file.
pub fn sync_pricing_defaults(db_path: &Path, defaults_path: &Path) -> Result<()> {
    let db = Db::open(db_path)?;
    let entries = db.list_price_entries()?;
    if entries.is_empty() && !defaults_path.exists() {
        return Ok(());
    }
    write_pricing_defaults(defaults_path, &entries)
}

pub fn load_pricing_defaults(path: &Path) -> Result<Vec<PriceEntry>> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(AppError::from)
}

pub fn load_initial_pricing() -> Result<Vec<PriceEntry>> {
    let data = include_str!("../initial-pricing.json");
    serde_json::from_str(data).map_err(AppError::from)
}

pub fn write_pricing_defaults(path: &Path, entries: &[PriceEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, entries).map_err(AppError::from)
}
