//! Incremental partition merge: each affected date-partition becomes the
//! deduplicated union of its previous contents and the new batch, rewritten
//! whole against the object store.

use std::collections::BTreeSet;

use polars::prelude::*;
use tracing::{error, info, warn};

use betlake_bucket::{BucketError, BucketStore};

use crate::dedupe::remove_duplicates;
use crate::error::{PipelineError, Result};
use crate::partition::{from_parquet_bytes, write_partitions};

/// Object-store prefix for one `(table, year, month, day)` partition.
pub fn partition_prefix(table_prefix: &str, year: i32, month: i32, day: i32) -> String {
    format!("{table_prefix}/year={year:04}/month={month:02}/day={day:02}/")
}

/// Reads every object under a partition prefix into one frame. An absent
/// partition is a legal state and comes back as `None`, never an error.
pub async fn read_partition(
    store: &dyn BucketStore,
    bucket: &str,
    prefix: &str,
) -> Result<Option<DataFrame>> {
    let keys = store.list_objects(bucket, prefix).await?;
    if keys.is_empty() {
        return Ok(None);
    }

    let mut combined: Option<DataFrame> = None;
    for key in &keys {
        let bytes = match store.get_object(bucket, key).await {
            Ok(bytes) => bytes,
            Err(BucketError::NotFound(_)) => {
                // Listed but deleted under us; treat as already absent.
                warn!(%key, "partition object vanished between list and get");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        let df = from_parquet_bytes(&bytes)?;
        match combined.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&df)?;
            }
            None => combined = Some(df),
        }
    }

    Ok(combined.filter(|df| !df.is_empty()))
}

/// Deletes every object currently stored under a partition prefix.
pub async fn delete_partition(store: &dyn BucketStore, bucket: &str, prefix: &str) -> Result<()> {
    let keys = store.list_objects(bucket, prefix).await?;
    if !keys.is_empty() {
        store.delete_objects(bucket, &keys).await?;
    }
    Ok(())
}

/// Reconciles a frame against the declared schema: absent columns are filled
/// with typed nulls, every column is cast to its declared type, and columns
/// come out in schema order. Handles schema additions over time without
/// failing previously written partitions.
pub fn align_to_schema(df: &DataFrame, schema: &[(&'static str, DataType)]) -> Result<DataFrame> {
    let exprs: Vec<Expr> = schema
        .iter()
        .map(|(name, dtype)| {
            if df.column(name).is_ok() {
                col(*name).cast(dtype.clone())
            } else {
                lit(NULL).cast(dtype.clone()).alias(*name)
            }
        })
        .collect();

    df.clone()
        .lazy()
        .select(exprs)
        .collect()
        .map_err(|err| PipelineError::Schema(err.to_string()))
}

/// Merges a partition's previous contents with a new batch under the
/// keep-latest-by-tie-break rule. Concatenation order does not bias the
/// result; only the tie-break field decides which record survives.
pub fn merge_partition(
    old: Option<&DataFrame>,
    new: &DataFrame,
    key_fields: &[&str],
    tie_break_field: &str,
) -> Result<DataFrame> {
    match old {
        Some(old) if !old.is_empty() => {
            let mut combined = new.clone();
            combined.vstack_mut(old)?;
            remove_duplicates(&combined, key_fields, tie_break_field)
        }
        _ => remove_duplicates(new, key_fields, tie_break_field),
    }
}

/// Distinct `(year, month, day)` keys present in the batch, ascending. Rows
/// with a null year (ineligible for this table) are skipped.
pub fn unique_partition_days(
    df: &DataFrame,
    part_cols: (&str, &str, &str),
) -> Result<Vec<(i32, i32, i32)>> {
    let years = df.column(part_cols.0)?.i32()?;
    let months = df.column(part_cols.1)?.i32()?;
    let days = df.column(part_cols.2)?.i32()?;

    let mut keys = BTreeSet::new();
    for idx in 0..df.height() {
        if let (Some(year), Some(month), Some(day)) =
            (years.get(idx), months.get(idx), days.get(idx))
        {
            keys.insert((year, month, day));
        }
    }

    Ok(keys.into_iter().collect())
}

fn filter_day(
    df: &DataFrame,
    part_cols: (&str, &str, &str),
    key: (i32, i32, i32),
    schema: &[(&'static str, DataType)],
) -> Result<DataFrame> {
    let selection: Vec<Expr> = schema.iter().map(|(name, _)| col(*name)).collect();
    Ok(df
        .clone()
        .lazy()
        .filter(
            col(part_cols.0)
                .eq(lit(key.0))
                .and(col(part_cols.1).eq(lit(key.1)))
                .and(col(part_cols.2).eq(lit(key.2))),
        )
        .select(selection)
        .collect()?)
}

/// Upserts a batch into one partitioned table. Affected partitions are
/// processed independently and sequentially in ascending date order; a
/// failure in one partition is logged and does not abort the others.
/// Each partition is rewritten by delete-then-write; a crash between the two
/// steps is recovered by re-running the same batch (the merge is idempotent).
#[allow(clippy::too_many_arguments)]
pub async fn insert_into_table(
    store: &dyn BucketStore,
    batch: &DataFrame,
    schema: &[(&'static str, DataType)],
    key_fields: &[&str],
    tie_break_field: &str,
    bucket: &str,
    table_prefix: &str,
    part_cols: (&str, &str, &str),
    partition_size: usize,
) -> Result<()> {
    let days = unique_partition_days(batch, part_cols)?;

    for (year, month, day) in days {
        let result = insert_into_partition(
            store,
            batch,
            schema,
            key_fields,
            tie_break_field,
            bucket,
            table_prefix,
            part_cols,
            (year, month, day),
            partition_size,
        )
        .await;

        if let Err(err) = result {
            error!(
                table_prefix,
                year, month, day, %err,
                "partition merge failed, continuing with remaining partitions"
            );
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_into_partition(
    store: &dyn BucketStore,
    batch: &DataFrame,
    schema: &[(&'static str, DataType)],
    key_fields: &[&str],
    tie_break_field: &str,
    bucket: &str,
    table_prefix: &str,
    part_cols: (&str, &str, &str),
    key: (i32, i32, i32),
    partition_size: usize,
) -> Result<()> {
    let (year, month, day) = key;
    let prefix = partition_prefix(table_prefix, year, month, day);
    info!(%prefix, "processing partition");

    let new_rows = filter_day(batch, part_cols, key, schema)?;

    // A read failure must not be mistaken for an empty partition: merging
    // without the old rows and then writing next to the unread objects would
    // resurrect superseded records. Propagate and let the caller skip the day.
    let old_rows = read_partition(store, bucket, &prefix)
        .await?
        .map(|df| align_to_schema(&df, schema))
        .transpose()?;
    let had_old = old_rows.is_some();

    let merged = merge_partition(old_rows.as_ref(), &new_rows, key_fields, tie_break_field)?;

    if had_old {
        delete_partition(store, bucket, &prefix).await?;
    }
    let written = write_partitions(store, &merged, bucket, &prefix, partition_size).await?;
    info!(%prefix, rows = merged.height(), objects = written, "partition rewritten");

    Ok(())
}
