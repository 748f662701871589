//! Raw day to master-layout batch: type normalization, deduplication, column
//! renaming and the partition keys each downstream table merges by.

use polars::prelude::*;
use tracing::info;

use betlake_bucket::BucketStore;

use crate::config::Config;
use crate::dedupe::remove_duplicates;
use crate::error::{PipelineError, Result};
use crate::merge::{align_to_schema, read_partition};
use crate::normalize::normalize_batch;
use crate::schema::{
    self, ANALYTICS_PARTITION_FIELD, COMMENT_FIELD, ELIGIBILITY_FIELD, MASTER_PARTITION_FIELD,
    RAW_KEY_FIELDS, RAW_MODIFY_DATE_FIELD,
};

/// Partition key columns for the master table (transaction date).
pub const MASTER_PART_COLS: (&str, &str, &str) = ("m_year", "m_month", "m_day");
/// Partition key columns for the analytics table (settlement date, gated on
/// the eligibility flag).
pub const ANALYTICS_PART_COLS: (&str, &str, &str) = ("a_year", "a_month", "a_day");

/// Release marker stamped onto every merged batch.
pub const RELEASE_MARKER: &str = env!("CARGO_PKG_VERSION");

fn date_parts(source: &str, target: (&str, &str, &str), gate: Option<Expr>) -> Vec<Expr> {
    let apply_gate = |expr: Expr| match &gate {
        Some(gate) => when(gate.clone()).then(expr).otherwise(lit(NULL)),
        None => expr,
    };

    vec![
        apply_gate(col(source).dt().year().cast(DataType::Int32)).alias(target.0),
        apply_gate(col(source).dt().month().cast(DataType::Int32)).alias(target.1),
        apply_gate(col(source).dt().day().cast(DataType::Int32)).alias(target.2),
    ]
}

/// Adds the merge partition keys: `m_*` from the transaction date for every
/// row, `a_*` from the settlement date only where the eligibility flag is
/// set. Ineligible rows keep null `a_*` keys and never reach analytics.
pub fn derive_partition_columns(df: DataFrame) -> Result<DataFrame> {
    let eligible = col(ELIGIBILITY_FIELD).eq(lit(1u8));

    let mut exprs = date_parts(MASTER_PARTITION_FIELD, MASTER_PART_COLS, None);
    exprs.extend(date_parts(
        ANALYTICS_PARTITION_FIELD,
        ANALYTICS_PART_COLS,
        Some(eligible),
    ));

    Ok(df.lazy().with_columns(exprs).collect()?)
}

/// Renames raw columns to their master names, stamps the release marker and
/// casts to the master schema.
pub fn to_master_layout(df: &DataFrame) -> Result<DataFrame> {
    let mut selection: Vec<Expr> = schema::raw_schema()
        .iter()
        .map(|(raw_name, _)| col(*raw_name).alias(schema::master_column_name(raw_name)))
        .collect();
    selection.push(lit(RELEASE_MARKER).alias(COMMENT_FIELD));

    let renamed = df.clone().lazy().select(selection).collect()?;
    align_to_schema(&renamed, &schema::master_schema())
}

/// Builds the merge-ready batch for one day from the raw layer: every raw
/// object under the day prefix, aligned, normalized, deduplicated by natural
/// key, renamed to master layout and keyed for partitioning.
pub async fn process_bets(
    store: &dyn BucketStore,
    config: &Config,
    day: &str,
) -> Result<DataFrame> {
    let prefix = config.raw_day_prefix(day);
    let raw = read_partition(store, &config.raw_bucket, &prefix)
        .await?
        .ok_or_else(|| PipelineError::NotFound(prefix.clone()))?;
    info!(%prefix, rows = raw.height(), "raw day loaded");

    let aligned = align_to_schema(&raw, &schema::raw_schema())?;
    let normalized = normalize_batch(aligned)?;
    let deduped = remove_duplicates(&normalized, &RAW_KEY_FIELDS, RAW_MODIFY_DATE_FIELD)?;
    info!(
        rows = deduped.height(),
        dropped = normalized.height() - deduped.height(),
        "day batch deduplicated"
    );

    let master = to_master_layout(&deduped)?;
    derive_partition_columns(master)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn datetime_series(name: &str, micros: Vec<Option<i64>>) -> Series {
        Series::new(name.into(), micros)
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
            .expect("cast to datetime")
    }

    fn date_series(name: &str, days: Vec<Option<i32>>) -> Series {
        Series::new(name.into(), days)
            .cast(&DataType::Date)
            .expect("cast to date")
    }

    #[test]
    fn partition_keys_follow_transaction_and_settlement_dates() {
        // 2024-03-05 12:00:00 UTC and 2024-03-07 as a date.
        let trans_micros = 1_709_640_000_000_000i64;
        let winlost_days = 19_789i32;

        let mut frame = df![
            "Ruben" => [1i32, 0],
        ]
        .expect("construct frame");
        frame
            .with_column(datetime_series(
                "TransDate",
                vec![Some(trans_micros), Some(trans_micros)],
            ))
            .expect("transdate");
        frame
            .with_column(date_series(
                "Winlostdate",
                vec![Some(winlost_days), Some(winlost_days)],
            ))
            .expect("winlostdate");

        let keyed = derive_partition_columns(frame).expect("derive");

        let m_year = keyed.column("m_year").unwrap().i32().unwrap();
        let m_month = keyed.column("m_month").unwrap().i32().unwrap();
        let m_day = keyed.column("m_day").unwrap().i32().unwrap();
        assert_eq!(
            (m_year.get(0), m_month.get(0), m_day.get(0)),
            (Some(2024), Some(3), Some(5))
        );

        let a_year = keyed.column("a_year").unwrap().i32().unwrap();
        let a_day = keyed.column("a_day").unwrap().i32().unwrap();
        assert_eq!((a_year.get(0), a_day.get(0)), (Some(2024), Some(7)));

        // Ineligible row gets master keys but null analytics keys.
        assert_eq!(m_year.get(1), Some(2024));
        assert_eq!(a_year.get(1), None);
    }

    #[test]
    fn null_settlement_date_yields_null_analytics_keys() {
        let mut frame = df![
            "Ruben" => [1i32],
        ]
        .expect("construct frame");
        frame
            .with_column(datetime_series("TransDate", vec![Some(0)]))
            .expect("transdate");
        frame
            .with_column(date_series("Winlostdate", vec![None]))
            .expect("winlostdate");

        let keyed = derive_partition_columns(frame).expect("derive");
        assert_eq!(keyed.column("a_year").unwrap().null_count(), 1);
        assert_eq!(keyed.column("m_year").unwrap().null_count(), 0);
    }

    #[test]
    fn master_layout_renames_and_stamps_release_marker() {
        let sparse = df![
            "customer" => ["a"],
            "transId" => [7i64],
            "status" => ["WON"],
        ]
        .expect("construct frame");
        let full = align_to_schema(&sparse, &schema::raw_schema()).expect("align raw");

        let master = to_master_layout(&full).expect("layout");
        let names = master.get_column_names_str();
        assert_eq!(names[0], "Customer");
        assert_eq!(names[1], "TransId");
        assert_eq!(names.last(), Some(&COMMENT_FIELD));

        let trans = master.column("TransId").unwrap().u64().unwrap();
        assert_eq!(trans.get(0), Some(7));
        let comment = master.column(COMMENT_FIELD).unwrap().str().unwrap();
        assert_eq!(comment.get(0), Some(RELEASE_MARKER));
    }
}
