//! Late-correction handling. Settled bets can be re-settled upstream, which
//! moves them to a different settlement-date partition; updates can also
//! arrive out of order. Both cases are detected by comparing the incoming
//! batch against the partitions it touches before anything is merged.

use polars::prelude::*;
use tracing::{error, info, warn};

use betlake_bucket::BucketStore;

use crate::error::Result;
use crate::merge::{
    delete_partition, partition_prefix, read_partition, unique_partition_days,
};
use crate::partition::write_partitions;
use crate::schema::{
    ANALYTICS_PARTITION_FIELD, MASTER_KEY_FIELDS, MASTER_MODIFY_DATE_FIELD, TERMINAL_STATUS,
};

/// Relocation partition key columns derived from the prior settlement date.
pub const RELOCATION_PART_COLS: (&str, &str, &str) = ("year", "month", "day");

/// What a scan of the touched master partitions found.
#[derive(Debug, Default)]
pub struct Corrections {
    /// Keys whose settlement changed, with the partition they must leave
    /// (`year`/`month`/`day` from the previous settlement date).
    pub relocations: Option<DataFrame>,
    /// Keys whose incoming update is older than what is already stored.
    pub stale_keys: Option<DataFrame>,
}

fn terminal_status(column: &str) -> Expr {
    TERMINAL_STATUS
        .iter()
        .map(|status| col(column).eq(lit(*status)))
        .reduce(|acc, expr| acc.or(expr))
        .expect("terminal status list is non-empty")
}

fn key_exprs() -> Vec<Expr> {
    MASTER_KEY_FIELDS.iter().map(|field| col(*field)).collect()
}

/// Keys present in both frames whose settlement outcome changed: the update
/// is newer and either the settlement date moved away from a settled record,
/// or a settled record went back to a non-terminal status. Returns the keys
/// together with the settlement date they were stored under.
pub fn changed_settlement_keys(old: &DataFrame, new: &DataFrame) -> Result<DataFrame> {
    let modify_right = format!("{MASTER_MODIFY_DATE_FIELD}_right");
    let winlost_right = format!("{ANALYTICS_PARTITION_FIELD}_right");

    let moved = col(ANALYTICS_PARTITION_FIELD)
        .neq(col(winlost_right.as_str()))
        .and(terminal_status("Status"));
    let unsettled = terminal_status("Status").and(terminal_status("Status_right").not());

    let mut selection = key_exprs();
    selection.push(col(ANALYTICS_PARTITION_FIELD));

    Ok(old
        .clone()
        .lazy()
        .join(
            new.clone().lazy(),
            key_exprs(),
            key_exprs(),
            JoinArgs::new(JoinType::Inner),
        )
        .filter(
            col(modify_right.as_str())
                .gt(col(MASTER_MODIFY_DATE_FIELD))
                .and(moved.or(unsettled)),
        )
        .select(selection)
        .collect()?)
}

/// Keys whose incoming row carries an older `ModifyDate` than the stored row.
/// Such rows are discarded instead of merged.
pub fn stale_update_keys(old: &DataFrame, new: &DataFrame) -> Result<DataFrame> {
    let modify_right = format!("{MASTER_MODIFY_DATE_FIELD}_right");

    Ok(old
        .clone()
        .lazy()
        .join(
            new.clone().lazy(),
            key_exprs(),
            key_exprs(),
            JoinArgs::new(JoinType::Inner),
        )
        .filter(col(modify_right.as_str()).lt(col(MASTER_MODIFY_DATE_FIELD)))
        .select(key_exprs())
        .collect()?)
}

/// Walks every master partition the batch touches and collects relocated and
/// stale keys. Partitions that do not exist yet contribute nothing.
pub async fn scan_master(
    store: &dyn BucketStore,
    bucket: &str,
    master_prefix: &str,
    batch: &DataFrame,
    part_cols: (&str, &str, &str),
) -> Result<Corrections> {
    let mut changed: Option<DataFrame> = None;
    let mut stale: Option<DataFrame> = None;

    for (year, month, day) in unique_partition_days(batch, part_cols)? {
        let prefix = partition_prefix(master_prefix, year, month, day);
        let Some(old) = read_partition(store, bucket, &prefix).await? else {
            continue;
        };

        let new_rows = batch
            .clone()
            .lazy()
            .filter(
                col(part_cols.0)
                    .eq(lit(year))
                    .and(col(part_cols.1).eq(lit(month)))
                    .and(col(part_cols.2).eq(lit(day))),
            )
            .collect()?;

        let day_changed = changed_settlement_keys(&old, &new_rows)?;
        if !day_changed.is_empty() {
            match changed.as_mut() {
                Some(acc) => acc.vstack_mut(&day_changed).map(|_| ())?,
                None => changed = Some(day_changed),
            }
        }

        let day_stale = stale_update_keys(&old, &new_rows)?;
        if !day_stale.is_empty() {
            match stale.as_mut() {
                Some(acc) => acc.vstack_mut(&day_stale).map(|_| ())?,
                None => stale = Some(day_stale),
            }
        }
    }

    let relocations = changed
        .map(|df| {
            df.lazy()
                .with_columns([
                    col(ANALYTICS_PARTITION_FIELD)
                        .dt()
                        .year()
                        .cast(DataType::Int32)
                        .alias(RELOCATION_PART_COLS.0),
                    col(ANALYTICS_PARTITION_FIELD)
                        .dt()
                        .month()
                        .cast(DataType::Int32)
                        .alias(RELOCATION_PART_COLS.1),
                    col(ANALYTICS_PARTITION_FIELD)
                        .dt()
                        .day()
                        .cast(DataType::Int32)
                        .alias(RELOCATION_PART_COLS.2),
                ])
                .collect()
        })
        .transpose()?;

    if let Some(relocations) = &relocations {
        info!(rows = relocations.height(), "settlement relocations detected");
    }
    if let Some(stale) = &stale {
        info!(rows = stale.height(), "stale updates detected");
    }

    Ok(Corrections {
        relocations,
        stale_keys: stale,
    })
}

/// Removes the batch rows that would regress stored records.
pub fn drop_stale(batch: &DataFrame, stale_keys: Option<&DataFrame>) -> Result<DataFrame> {
    let Some(keys) = stale_keys.filter(|keys| !keys.is_empty()) else {
        return Ok(batch.clone());
    };

    Ok(batch
        .clone()
        .lazy()
        .join(
            keys.clone().lazy(),
            key_exprs(),
            key_exprs(),
            JoinArgs::new(JoinType::Anti),
        )
        .collect()?)
}

/// Deletes relocated keys from the partitions they used to live in, rewriting
/// each affected partition without them. A partition that has since vanished
/// is logged and skipped, and a failure in one partition does not abort the
/// purge of the others.
pub async fn purge_relocated(
    store: &dyn BucketStore,
    bucket: &str,
    table_prefix: &str,
    relocations: &DataFrame,
    partition_size: usize,
) -> Result<()> {
    for (year, month, day) in unique_partition_days(relocations, RELOCATION_PART_COLS)? {
        let prefix = partition_prefix(table_prefix, year, month, day);
        let result = purge_partition(
            store,
            bucket,
            &prefix,
            relocations,
            (year, month, day),
            partition_size,
        )
        .await;

        if let Err(err) = result {
            error!(
                %prefix, %err,
                "partition purge failed, continuing with remaining partitions"
            );
        }
    }

    Ok(())
}

async fn purge_partition(
    store: &dyn BucketStore,
    bucket: &str,
    prefix: &str,
    relocations: &DataFrame,
    key: (i32, i32, i32),
    partition_size: usize,
) -> Result<()> {
    let (year, month, day) = key;
    let Some(old) = read_partition(store, bucket, prefix).await? else {
        warn!(prefix, "relocation source partition is absent, skipping");
        return Ok(());
    };

    let keys = relocations
        .clone()
        .lazy()
        .filter(
            col(RELOCATION_PART_COLS.0)
                .eq(lit(year))
                .and(col(RELOCATION_PART_COLS.1).eq(lit(month)))
                .and(col(RELOCATION_PART_COLS.2).eq(lit(day))),
        )
        .select(key_exprs())
        .collect()?;

    let remaining = old
        .lazy()
        .join(
            keys.lazy(),
            key_exprs(),
            key_exprs(),
            JoinArgs::new(JoinType::Anti),
        )
        .collect()?;

    info!(
        prefix,
        remaining = remaining.height(),
        "rewriting partition without relocated keys"
    );
    delete_partition(store, bucket, prefix).await?;
    write_partitions(store, &remaining, bucket, prefix, partition_size).await?;

    Ok(())
}
