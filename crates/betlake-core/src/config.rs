use chrono::{Duration, Utc};
use chrono_tz::America::Caracas;

use crate::error::{PipelineError, Result};

/// Pipeline configuration, built once from the process environment and passed
/// by reference into each stage.
#[derive(Debug, Clone)]
pub struct Config {
    pub source_bucket: String,
    pub source_table: String,
    pub raw_bucket: String,
    pub raw_table: String,
    pub analytic_bucket: String,
    pub analytic_table: String,
    /// Day override (`YYYYMMDD`). When unset, stages default to yesterday in
    /// the operational timezone.
    pub day_batch: Option<String>,
    pub raw_batch_size: usize,
    pub raw_partition_size: usize,
    pub merge_partition_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            source_bucket: require("SOURCE_BUCKET")?,
            source_table: require("SOURCE_DB")?,
            raw_bucket: require("RAW_BUCKET")?,
            raw_table: require("RAW_BUCKET_TABLE")?,
            analytic_bucket: require("ANALYTIC_BUCKET")?,
            analytic_table: require("ANALYTIC_BUCKET_TABLE")?,
            day_batch: std::env::var("DAY_BATCH").ok().filter(|v| !v.is_empty()),
            raw_batch_size: optional_usize("RAW_BATCH_SIZE", 400_000)?,
            raw_partition_size: optional_usize("RAW_PARTITION_SIZE", 100_000)?,
            merge_partition_size: optional_usize("MERGE_PARTITION_SIZE", 800_000)?,
        })
    }

    /// The day a run processes when no override is given: yesterday relative
    /// to the operational timezone, as `YYYYMMDD`.
    pub fn resolve_day(&self) -> String {
        match &self.day_batch {
            Some(day) => day.clone(),
            None => (Utc::now().with_timezone(&Caracas) - Duration::days(1))
                .format("%Y%m%d")
                .to_string(),
        }
    }

    /// Raw-layer day prefix, e.g. `raw/bets/day=20240101/`.
    pub fn raw_day_prefix(&self, day: &str) -> String {
        format!("{}/bets/day={day}/", self.raw_table)
    }

    /// Source-layer day prefix consumed by the raw promotion stage.
    pub fn source_day_prefix(&self, day: &str) -> String {
        format!("{}/bets/day={day}/", self.source_table)
    }

    /// Analytics table prefix, partitions keyed by settlement date.
    pub fn analytics_prefix(&self) -> String {
        format!("{}/bets", self.analytic_table)
    }

    /// Master table prefix, partitions keyed by transaction date.
    pub fn master_prefix(&self) -> String {
        format!("{}/mp", self.analytic_table)
    }

    /// Control CSV object key for the bets table.
    pub fn control_key(&self) -> String {
        format!("{}/control/bets.csv", self.raw_table)
    }
}

fn require(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| PipelineError::Configuration(format!("{name} must be set")))
}

fn optional_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| PipelineError::Configuration(format!("{name} must be an integer"))),
        Err(_) => Ok(default),
    }
}
