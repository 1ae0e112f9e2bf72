use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use meter_core::{PriceEntry, Provider, QuotaLimits};
use rusqlite::Row;
use rust_decimal::Decimal;

use crate::error::{DbError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(value, DATE_FORMAT)?)
}

/// Spend is kept as decimal text so stored sums never pick up float drift.
pub(crate) fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

pub(crate) fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|_| DbError::InvalidValue(value.to_string()))
}

pub(crate) fn now_ts() -> String {
    format_ts(Utc::now())
}

pub(crate) fn row_to_price_entry(row: &Row<'_>) -> std::result::Result<PriceEntry, rusqlite::Error> {
    Ok(PriceEntry {
        model_id: row.get(0)?,
        provider: Provider::parse(&row.get::<_, String>(1)?),
        input_per_1m: row.get(2)?,
        output_per_1m: row.get(3)?,
    })
}

/// Reads three limit columns starting at `offset`.
pub(crate) fn row_to_limits(
    row: &Row<'_>,
    offset: usize,
) -> std::result::Result<QuotaLimits, rusqlite::Error> {
    Ok(QuotaLimits {
        daily_token_limit: row.get::<_, Option<i64>>(offset)?.map(|value| value.max(0) as u64),
        daily_message_limit: row
            .get::<_, Option<i64>>(offset + 1)?
            .map(|value| value.max(0) as u64),
        monthly_budget: row.get(offset + 2)?,
    })
}

pub(crate) fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
