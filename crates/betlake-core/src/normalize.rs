//! Canonicalization of the heterogeneous string fields the upstream API
//! produces, applied before any merge so tie-breaks and partition keys are
//! computed over typed columns.

use chrono::NaiveDateTime;
use polars::prelude::*;

use crate::error::{PipelineError, Result};
use crate::schema;

const DATETIME_PATTERN: &str = "%Y-%m-%dT%H:%M:%S%.f";
/// Canonical timestamp length: `YYYY-MM-DDTHH:MM:SS.mmm`.
const CANONICAL_LEN: usize = 23;
/// Second-precision timestamps arrive as 19 characters and get `.000`.
const SECONDS_LEN: usize = 19;

/// Pads a truncated timestamp string to millisecond precision. Lenient on
/// purpose: unexpected lengths are right-padded with `'0'` rather than
/// rejected, and null/empty pass through unchanged.
pub fn format_date(date: &str) -> String {
    if date.is_empty() {
        return date.to_string();
    }
    if date.len() == SECONDS_LEN {
        return format!("{date}.000");
    }
    let mut padded = date.to_string();
    while padded.len() < CANONICAL_LEN {
        padded.push('0');
    }
    padded
}

/// Ensures the `0x` hex prefix and uppercase digits. Idempotent: an already
/// prefixed value keeps a single lowercase `0x`.
pub fn format_tstamp(tstamp: &str) -> String {
    let body = tstamp
        .strip_prefix("0x")
        .or_else(|| tstamp.strip_prefix("0X"))
        .unwrap_or(tstamp);
    format!("0x{}", body.to_uppercase())
}

fn parse_datetime_micros(field: &str, value: &str) -> Result<i64> {
    let padded = format_date(value);
    let parsed = NaiveDateTime::parse_from_str(&padded, DATETIME_PATTERN).map_err(|err| {
        PipelineError::Schema(format!("cannot parse {field} value '{value}': {err}"))
    })?;
    Ok(parsed.and_utc().timestamp_micros())
}

fn datetime_column(df: &DataFrame, field: &str) -> Result<Series> {
    let values = df.column(field)?.str()?;
    let mut micros: Vec<Option<i64>> = Vec::with_capacity(values.len());
    for value in values.into_iter() {
        match value {
            None => micros.push(None),
            Some(raw) if raw.is_empty() => micros.push(None),
            Some(raw) => micros.push(Some(parse_datetime_micros(field, raw)?)),
        }
    }
    Ok(Series::new(field.into(), micros)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?)
}

fn date_column(df: &DataFrame, field: &str) -> Result<Series> {
    Ok(datetime_column(df, field)?.cast(&DataType::Date)?)
}

fn string_mapped_column(
    df: &DataFrame,
    field: &str,
    transform: impl Fn(&str) -> String,
) -> Result<Series> {
    let values = df.column(field)?.str()?;
    let mapped: Vec<Option<String>> = values
        .into_iter()
        .map(|value| value.map(&transform))
        .collect();
    Ok(Series::new(field.into(), mapped))
}

/// Normalizes a raw-layer batch in place: datetime fields become `Datetime`,
/// date fields become `Date`, the tstamp tag is canonicalized and statuses
/// are uppercased.
pub fn normalize_batch(mut df: DataFrame) -> Result<DataFrame> {
    for field in schema::RAW_DATETIME_FIELDS {
        let column = datetime_column(&df, field)?;
        df.with_column(column)?;
    }
    for field in schema::RAW_DATE_FIELDS {
        let column = date_column(&df, field)?;
        df.with_column(column)?;
    }

    let tstamp = string_mapped_column(&df, schema::RAW_TSTAMP_FIELD, format_tstamp)?;
    df.with_column(tstamp)?;

    let status = string_mapped_column(&df, schema::RAW_STATUS_FIELD, |s| s.to_uppercase())?;
    df.with_column(status)?;

    Ok(df)
}
