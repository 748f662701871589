//! Daily merge orchestration: claim the pending control entry, build the day
//! batch, reconcile corrections against the stored partitions, merge into
//! master and analytics and write the control log back.

use chrono::Utc;
use tracing::{info, warn};

use betlake_bucket::BucketStore;

use crate::config::Config;
use crate::control::{
    self, next_pending, read_control, record_execution, schedule_next_execution, write_control,
    ExecutionRecord,
};
use crate::corrections::{drop_stale, purge_relocated, scan_master};
use crate::error::Result;
use crate::merge::insert_into_table;
use crate::schema::{self, MASTER_KEY_FIELDS, MASTER_MODIFY_DATE_FIELD};
use crate::transform::{process_bets, ANALYTICS_PART_COLS, MASTER_PART_COLS, RELEASE_MARKER};

/// Outcome of one merge run.
#[derive(Debug)]
pub struct RunReport {
    pub day: String,
    pub rows: usize,
    pub relocated: usize,
    pub stale_dropped: usize,
}

/// Runs the full merge stage for one day.
pub async fn run_day(store: &dyn BucketStore, config: &Config, day: &str) -> Result<RunReport> {
    let started = Utc::now().naive_utc();

    let control_key = config.control_key();
    let control = read_control(store, &config.raw_bucket, &control_key).await?;
    let claimed = next_pending(&control)?;
    if claimed.day != day {
        warn!(
            scheduled = %claimed.day,
            processing = day,
            "control entry scheduled for a different day"
        );
    }

    let batch = process_bets(store, config, day).await?;

    let master_prefix = config.master_prefix();
    let corrections = scan_master(
        store,
        &config.analytic_bucket,
        &master_prefix,
        &batch,
        MASTER_PART_COLS,
    )
    .await?;

    let stale_dropped = corrections
        .stale_keys
        .as_ref()
        .map(|keys| keys.height())
        .unwrap_or(0);
    let batch = drop_stale(&batch, corrections.stale_keys.as_ref())?;

    let relocated = match &corrections.relocations {
        Some(relocations) => {
            purge_relocated(
                store,
                &config.analytic_bucket,
                &config.analytics_prefix(),
                relocations,
                config.merge_partition_size,
            )
            .await?;
            relocations.height()
        }
        None => 0,
    };

    insert_into_table(
        store,
        &batch,
        &schema::master_schema(),
        &MASTER_KEY_FIELDS,
        MASTER_MODIFY_DATE_FIELD,
        &config.analytic_bucket,
        &master_prefix,
        MASTER_PART_COLS,
        config.merge_partition_size,
    )
    .await?;

    insert_into_table(
        store,
        &batch,
        &schema::master_schema(),
        &MASTER_KEY_FIELDS,
        MASTER_MODIFY_DATE_FIELD,
        &config.analytic_bucket,
        &config.analytics_prefix(),
        ANALYTICS_PART_COLS,
        config.merge_partition_size,
    )
    .await?;

    let finished = Utc::now().naive_utc();
    let record = ExecutionRecord {
        n_registers: batch.height() as u32,
        started,
        finished,
        comment: RELEASE_MARKER.to_string(),
    };
    let control = record_execution(&control, claimed.index, &record)?;
    // Schedule from the claimed entry's day, not the day being processed; a
    // mismatched ad-hoc run must not skip or double-book a control slot.
    let control = schedule_next_execution(&control, &claimed.day)?;
    write_control(store, &config.raw_bucket, &control_key, &control).await?;

    let report = RunReport {
        day: day.to_string(),
        rows: batch.height(),
        relocated,
        stale_dropped,
    };
    info!(
        day = %report.day,
        rows = report.rows,
        relocated = report.relocated,
        stale_dropped = report.stale_dropped,
        "merge run complete"
    );
    Ok(report)
}

/// Seeds an empty control log with a pending entry for `day`. Used once when
/// a table is first provisioned.
pub async fn bootstrap_control(
    store: &dyn BucketStore,
    config: &Config,
    day: &str,
) -> Result<()> {
    let empty = polars::prelude::DataFrame::empty_with_schema(&schema::control_schema_ref());
    // schedule_next_execution appends day + 1, so back up one day.
    let previous = chrono::NaiveDate::parse_from_str(day, "%Y%m%d")
        .map_err(|err| {
            crate::error::PipelineError::business(
                control::CONTROL_WRITE_CODE,
                format!("invalid day '{day}': {err}"),
            )
        })?
        .pred_opt()
        .ok_or_else(|| {
            crate::error::PipelineError::business(control::CONTROL_WRITE_CODE, "day underflow")
        })?
        .format("%Y%m%d")
        .to_string();
    let seeded = schedule_next_execution(&empty, &previous)?;
    write_control(store, &config.raw_bucket, &config.control_key(), &seeded).await
}
