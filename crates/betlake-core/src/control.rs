//! Control log: one CSV per table recording every load. Each run claims the
//! pending row left by the previous run, fills in its execution details and
//! appends a fresh pending row for the next day.

use std::io::Cursor;

use bytes::Bytes;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use tracing::info;

use betlake_bucket::BucketStore;

use crate::error::{PipelineError, Result};
use crate::schema::control_schema_ref;

/// Operator-facing codes carried on control-log failures.
pub const CONTROL_READ_CODE: &str = "LTB-EXT-CFE-001";
pub const CONTROL_WRITE_CODE: &str = "LTB-EXT-CFE-002";

/// Marks a row whose run has not happened yet.
pub const PENDING_MARKER: &str = "----";
const STANDARD_INSERTION: &str = "STANDARD";
const SENTINEL_TIMESTAMP: &str = "2000-01-01T00:00:00";
const TIMESTAMP_PATTERN: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const DAY_PATTERN: &str = "%Y%m%d";

/// The pending row a run claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEntry {
    pub index: u32,
    pub day: String,
}

/// Execution details written back onto a claimed row.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub n_registers: u32,
    pub started: NaiveDateTime,
    pub finished: NaiveDateTime,
    pub comment: String,
}

pub async fn read_control(
    store: &dyn BucketStore,
    bucket: &str,
    key: &str,
) -> Result<DataFrame> {
    let bytes = store
        .get_object(bucket, key)
        .await
        .map_err(|err| PipelineError::business(CONTROL_READ_CODE, err))?;

    CsvReadOptions::default()
        .with_has_header(true)
        .with_schema(Some(control_schema_ref()))
        .into_reader_with_file_handle(Cursor::new(bytes.as_ref()))
        .finish()
        .map_err(|err| PipelineError::business(CONTROL_READ_CODE, err))
}

pub async fn write_control(
    store: &dyn BucketStore,
    bucket: &str,
    key: &str,
    control: &DataFrame,
) -> Result<()> {
    let mut buffer = Vec::new();
    {
        let mut clone = control.clone();
        CsvWriter::new(Cursor::new(&mut buffer))
            .include_header(true)
            .finish(&mut clone)
            .map_err(|err| PipelineError::business(CONTROL_WRITE_CODE, err))?;
    }
    store
        .put_object(bucket, key, Bytes::from(buffer))
        .await
        .map_err(|err| PipelineError::business(CONTROL_WRITE_CODE, err))
}

/// Finds the pending row. Absence means the log is corrupt or a previous run
/// never scheduled a successor.
pub fn next_pending(control: &DataFrame) -> Result<ControlEntry> {
    let indices = control.column("index")?.u32()?;
    let days = control.column("day")?.str()?;
    let types = control.column("insertion_type")?.str()?;

    for row in 0..control.height() {
        if types.get(row) == Some(PENDING_MARKER) {
            let (Some(index), Some(day)) = (indices.get(row), days.get(row)) else {
                continue;
            };
            return Ok(ControlEntry {
                index,
                day: day.to_string(),
            });
        }
    }

    Err(PipelineError::NotFound(
        "no pending control entry".to_string(),
    ))
}

/// Execution timestamps are recorded in the table's reporting offset, one
/// hour behind the run clock.
fn reporting_timestamp(moment: NaiveDateTime) -> String {
    (moment - Duration::hours(1))
        .format(TIMESTAMP_PATTERN)
        .to_string()
}

/// Writes the run outcome onto the claimed row.
pub fn record_execution(
    control: &DataFrame,
    index: u32,
    record: &ExecutionRecord,
) -> Result<DataFrame> {
    let duration = (record.finished - record.started).num_milliseconds() as f32 / 1_000.0;
    let claimed = col("index").eq(lit(index));

    let updated = control
        .clone()
        .lazy()
        .with_columns([
            when(claimed.clone())
                .then(lit(STANDARD_INSERTION))
                .otherwise(col("insertion_type"))
                .alias("insertion_type"),
            when(claimed.clone())
                .then(lit(record.n_registers))
                .otherwise(col("n_registers"))
                .alias("n_registers"),
            when(claimed.clone())
                .then(lit(duration))
                .otherwise(col("duration"))
                .alias("duration"),
            when(claimed.clone())
                .then(lit(reporting_timestamp(record.started)))
                .otherwise(col("start_execution"))
                .alias("start_execution"),
            when(claimed.clone())
                .then(lit(reporting_timestamp(record.finished)))
                .otherwise(col("end_execution"))
                .alias("end_execution"),
            when(claimed)
                .then(lit(record.comment.as_str()))
                .otherwise(col("comments"))
                .alias("comments"),
        ])
        .collect()?;

    info!(index, "control entry recorded");
    Ok(updated)
}

/// Appends a pending row for the day after the one just processed.
pub fn schedule_next_execution(control: &DataFrame, processed_day: &str) -> Result<DataFrame> {
    let day = NaiveDate::parse_from_str(processed_day, DAY_PATTERN).map_err(|err| {
        PipelineError::business(
            CONTROL_WRITE_CODE,
            format!("invalid day '{processed_day}': {err}"),
        )
    })?;
    let next_day = (day + Duration::days(1)).format(DAY_PATTERN).to_string();

    let next_index = control
        .column("index")?
        .u32()?
        .max()
        .map(|max| max + 1)
        .unwrap_or(0);

    let sentinel = DataFrame::new(vec![
        Series::new("index".into(), vec![next_index]).into(),
        Series::new("day".into(), vec![next_day]).into(),
        Series::new("insertion_type".into(), vec![PENDING_MARKER]).into(),
        Series::new("n_registers".into(), vec![0u32]).into(),
        Series::new("duration".into(), vec![0.0f32]).into(),
        Series::new("start_execution".into(), vec![SENTINEL_TIMESTAMP]).into(),
        Series::new("end_execution".into(), vec![SENTINEL_TIMESTAMP]).into(),
        Series::new("comments".into(), vec!["---"]).into(),
    ])?;

    let mut combined = control.clone();
    combined.vstack_mut(&sentinel)?;
    Ok(combined)
}
