//! Raw promotion: consolidates one day of ingested objects into the raw
//! layer's size-bounded batch layout. Content is passed through aligned but
//! otherwise untouched; typing happens later in the transform stage.

use tracing::info;

use betlake_bucket::BucketStore;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::merge::{align_to_schema, read_partition};
use crate::partition::write_batches;
use crate::schema;

/// Report of one promotion run.
#[derive(Debug)]
pub struct PromotionReport {
    pub day: String,
    pub rows: usize,
    pub batches: usize,
}

/// Copies every ingested object for `day` into the raw day prefix, re-split
/// into `batch=<n>/part_<n>` objects of bounded size.
pub async fn promote_day(
    store: &dyn BucketStore,
    config: &Config,
    day: &str,
) -> Result<PromotionReport> {
    let source_prefix = config.source_day_prefix(day);
    let ingested = read_partition(store, &config.source_bucket, &source_prefix)
        .await?
        .ok_or_else(|| PipelineError::NotFound(source_prefix.clone()))?;
    info!(%source_prefix, rows = ingested.height(), "ingested day loaded");

    let aligned = align_to_schema(&ingested, &schema::raw_schema())?;

    let raw_prefix = config.raw_day_prefix(day);
    let batches = write_batches(
        store,
        &aligned,
        &config.raw_bucket,
        &raw_prefix,
        config.raw_batch_size,
        config.raw_partition_size,
    )
    .await?;
    info!(%raw_prefix, batches, "day promoted to raw layer");

    Ok(PromotionReport {
        day: day.to_string(),
        rows: aligned.height(),
        batches,
    })
}
