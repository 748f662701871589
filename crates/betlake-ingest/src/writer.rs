//! Turns a buffered slice of feed records into one parquet object. The key
//! encodes the modify-date range and the rowversion tag so the poller can be
//! restarted from the stored files alone.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration, NaiveDateTime, Timelike};
use polars::prelude::*;
use tracing::info;

use betlake_bucket::BucketStore;
use betlake_core::normalize::format_date;
use betlake_core::partition::to_parquet_bytes;
use betlake_core::schema::raw_schema;

use crate::error::{IngestError, Result};
use crate::state::parse_iso_timestamp;

/// The day folder trails the end stamp by three hours, so records written
/// shortly after midnight stay with the day they were fetched for.
const DAY_FOLDER_LAG_HOURS: i64 = 3;
const FILE_STAMP_PATTERN: &str = "%Y%m%d%H%M%S";

pub fn raw_schema_ref() -> SchemaRef {
    Arc::new(Schema::from_iter(
        raw_schema()
            .into_iter()
            .map(|(name, dtype)| Field::new(name.into(), dtype)),
    ))
}

fn records_to_frame(records: &[serde_json::Value]) -> Result<DataFrame> {
    let mut lines = String::new();
    for record in records {
        lines.push_str(&serde_json::to_string(record).map_err(|err| {
            IngestError::State(format!("cannot serialize feed record: {err}"))
        })?);
        lines.push('\n');
    }

    Ok(JsonLineReader::new(Cursor::new(lines.into_bytes()))
        .with_schema(raw_schema_ref())
        .finish()?)
}

/// Object key for a chunk covering `[start, end]` that stopped at `tstamp`.
pub fn chunk_key(prefix: &str, start: NaiveDateTime, end: NaiveDateTime, tstamp: &str) -> String {
    let folder = (end - Duration::hours(DAY_FOLDER_LAG_HOURS)).format("%Y%m%d");
    let batch = end
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("truncating to the hour is always valid")
        .format(FILE_STAMP_PATTERN);
    let start = start.format(FILE_STAMP_PATTERN);
    let end = end.format(FILE_STAMP_PATTERN);
    format!("{prefix}day={folder}/batch={batch}/part_{start}-{end}_{tstamp}.snappy.parquet")
}

/// Writes one chunk of records and returns its object key.
pub async fn write_chunk(
    store: &dyn BucketStore,
    bucket: &str,
    prefix: &str,
    records: &[serde_json::Value],
    start_date: &str,
    end_date: &str,
    tstamp: &str,
) -> Result<String> {
    let start = parse_iso_timestamp(&format_date(start_date))?;
    let end = parse_iso_timestamp(&format_date(end_date))?;

    let frame = records_to_frame(records)?;
    let key = chunk_key(prefix, start, end, tstamp);
    let bytes = to_parquet_bytes(&frame).map_err(IngestError::Pipeline)?;
    store.put_object(bucket, &key, Bytes::from(bytes)).await?;

    info!(%key, rows = records.len(), "chunk written");
    Ok(key)
}
