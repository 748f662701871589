//! Size-bounded partition files and batch subdirectories. The store has no
//! in-place update, so every writer here produces whole objects that callers
//! may later delete-and-rewrite as a unit.

use std::io::Cursor;

use bytes::Bytes;
use polars::io::parquet::write::ParquetCompression;
use polars::prelude::*;
use tracing::debug;

use betlake_bucket::BucketStore;

use crate::error::Result;

/// Serializes a DataFrame as a snappy-compressed parquet object.
pub fn to_parquet_bytes(df: &DataFrame) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut clone = df.clone();
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Snappy)
            .finish(&mut clone)?;
    }
    Ok(buffer)
}

pub fn from_parquet_bytes(bytes: &[u8]) -> Result<DataFrame> {
    Ok(ParquetReader::new(Cursor::new(bytes)).finish()?)
}

/// Splits `df` into contiguous slices of at most `partition_size` rows and
/// writes each as `part_<%012d>.snappy.parquet` under `prefix`. Returns the
/// number of partitions written. Input order is preserved; a partial failure
/// leaves earlier partitions in place and relies on whole-partition rewrite
/// idempotence for retries.
pub async fn write_partitions(
    store: &dyn BucketStore,
    df: &DataFrame,
    bucket: &str,
    prefix: &str,
    partition_size: usize,
) -> Result<usize> {
    let mut partition_index = 0usize;
    let mut offset = 0usize;

    while offset < df.height() {
        let slice = df.slice(offset as i64, partition_size);
        let key = format!("{prefix}part_{partition_index:012}.snappy.parquet");
        let bytes = to_parquet_bytes(&slice)?;
        store.put_object(bucket, &key, Bytes::from(bytes)).await?;
        debug!(%key, rows = slice.height(), "wrote partition object");

        partition_index += 1;
        offset += partition_size;
    }

    Ok(partition_index)
}

/// Slices `df` into `batch_size`-row super-groups, each written under its own
/// `batch=<%012d>/` sub-prefix via [`write_partitions`]. Returns the number
/// of batches. Used by the raw promotion stage to bound raw file growth.
pub async fn write_batches(
    store: &dyn BucketStore,
    df: &DataFrame,
    bucket: &str,
    prefix: &str,
    batch_size: usize,
    partition_size: usize,
) -> Result<usize> {
    let mut batch_index = 0usize;
    let mut offset = 0usize;

    while offset < df.height() {
        let batch = df.slice(offset as i64, batch_size);
        let batch_prefix = format!("{prefix}batch={batch_index:012}/");
        write_partitions(store, &batch, bucket, &batch_prefix, partition_size).await?;
        debug!(%batch_prefix, rows = batch.height(), "wrote batch");

        batch_index += 1;
        offset += batch_size;
    }

    Ok(batch_index)
}
