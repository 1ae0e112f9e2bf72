use std::path::PathBuf;

use meter_core::{CatalogError, PriceCatalog, PriceEntry, PricingCatalog, Provider};
use rusqlite::{OptionalExtension, params};

use crate::Db;
use crate::error::Result;
use crate::helpers::{now_ts, row_to_price_entry};

impl Db {
    pub fn list_price_entries(&self) -> Result<Vec<PriceEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT model_id, provider, input_per_1m, output_per_1m
            FROM price_entry
            ORDER BY model_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], row_to_price_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_price_entry(&self, model_id: &str) -> Result<Option<PriceEntry>> {
        let entry = self
            .conn
            .query_row(
                r#"
                SELECT model_id, provider, input_per_1m, output_per_1m
                FROM price_entry
                WHERE model_id = ?1
                "#,
                params![model_id],
                row_to_price_entry,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn price_entries_for_provider(&self, provider: Provider) -> Result<Vec<PriceEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT model_id, provider, input_per_1m, output_per_1m
            FROM price_entry
            WHERE provider = ?1
            ORDER BY model_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![provider.as_str()], row_to_price_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn replace_price_entries(&mut self, entries: &[PriceEntry]) -> Result<usize> {
        let updated_at = now_ts();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM price_entry", [])?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO price_entry (
                  model_id, provider, input_per_1m, output_per_1m, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.model_id,
                    entry.provider.as_str(),
                    entry.input_per_1m,
                    entry.output_per_1m,
                    updated_at
                ])?;
                inserted += 1;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn count_price_entries(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM price_entry", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    /// In-memory copy of the catalog for resolvers that price many events.
    pub fn catalog_snapshot(&self) -> Result<PriceCatalog> {
        Ok(PriceCatalog::from_entries(self.list_price_entries()?))
    }
}

/// Catalog backed by the SQLite file at `path`, read on every lookup.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    path: PathBuf,
}

impl SqliteCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> std::result::Result<Db, CatalogError> {
        Db::open(&self.path).map_err(unavailable)
    }
}

impl PricingCatalog for SqliteCatalog {
    fn find_by_model(
        &self,
        model_id: &str,
    ) -> std::result::Result<Option<PriceEntry>, CatalogError> {
        self.open()?.find_price_entry(model_id).map_err(unavailable)
    }

    fn find_by_provider(
        &self,
        provider: Provider,
    ) -> std::result::Result<Vec<PriceEntry>, CatalogError> {
        self.open()?
            .price_entries_for_provider(provider)
            .map_err(unavailable)
    }
}

fn unavailable(err: crate::error::DbError) -> CatalogError {
    CatalogError(err.to_string())
}
