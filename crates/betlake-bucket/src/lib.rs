//! Abstractions over S3-compatible storage backends used for the bet lake layers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

/// S3 limits a single DeleteObjects call to this many keys.
const DELETE_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-2".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

impl BucketError {
    fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Lists every object key under `prefix`, fully materialized across pages.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BucketError>;
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError>;
    async fn put_object(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<(), BucketError>;
    /// Deletes `keys`, chunking internally to the per-call limit. A failed
    /// chunk is retried once and does not abort the remaining chunks.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BucketError>;
}

#[derive(Clone)]
pub struct S3BucketStore {
    client: Client,
}

impl S3BucketStore {
    pub async fn new(config: S3Config) -> Result<Self, BucketError> {
        if config.region.is_empty() {
            return Err(BucketError::Configuration(
                "region cannot be empty".into(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        Ok(Self { client })
    }

    async fn delete_chunk(&self, bucket: &str, chunk: &[String]) -> Result<(), BucketError> {
        let mut identifiers = Vec::with_capacity(chunk.len());
        for key in chunk {
            let identifier = ObjectIdentifier::builder()
                .key(key)
                .build()
                .map_err(BucketError::from_sdk)?;
            identifiers.push(identifier);
        }

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .build()
            .map_err(BucketError::from_sdk)?;

        self.client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }
}

#[async_trait]
impl BucketStore for S3BucketStore {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BucketError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(BucketError::from_sdk)?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
        }

        Ok(keys)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err {
                SdkError::ServiceError(service_err) => {
                    let message = service_err.err().to_string();
                    if message.contains("NoSuchKey") {
                        BucketError::NotFound(key.to_string())
                    } else {
                        BucketError::from_sdk(message)
                    }
                }
                other => BucketError::from_sdk(other),
            })?;

        let data = output.body.collect().await.map_err(BucketError::from_sdk)?;
        Ok(Bytes::from(data.into_bytes()))
    }

    async fn put_object(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<(), BucketError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BucketError> {
        let mut first_failure = None;

        for chunk in keys.chunks(DELETE_CHUNK_SIZE) {
            if let Err(err) = self.delete_chunk(bucket, chunk).await {
                warn!(%err, chunk_len = chunk.len(), "delete chunk failed, retrying once");
                if let Err(err) = self.delete_chunk(bucket, chunk).await {
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-memory store used by tests and local dry runs. Keys are returned in
/// lexicographic order, matching S3 list semantics.
#[derive(Default)]
pub struct MemoryBucketStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn compose(bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    pub fn object_count(&self, bucket: &str, prefix: &str) -> usize {
        let full = Self::compose(bucket, prefix);
        self.objects
            .lock()
            .expect("memory store poisoned")
            .keys()
            .filter(|key| key.starts_with(&full))
            .count()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BucketError> {
        let full = Self::compose(bucket, prefix);
        let strip = format!("{bucket}/");
        let objects = self.objects.lock().expect("memory store poisoned");
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(&full))
            .map(|key| key[strip.len()..].to_string())
            .collect())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BucketError> {
        let objects = self.objects.lock().expect("memory store poisoned");
        objects
            .get(&Self::compose(bucket, key))
            .cloned()
            .ok_or_else(|| BucketError::NotFound(key.to_string()))
    }

    async fn put_object(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<(), BucketError> {
        let mut objects = self.objects.lock().expect("memory store poisoned");
        objects.insert(Self::compose(bucket, key), bytes);
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BucketError> {
        let mut objects = self.objects.lock().expect("memory store poisoned");
        for key in keys {
            objects.remove(&Self::compose(bucket, key));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_lists_by_prefix_in_order() {
        let store = MemoryBucketStore::new();
        for key in ["t/day=2/b.parquet", "t/day=1/a.parquet", "t/day=1/b.parquet"] {
            store
                .put_object("bucket", key, Bytes::from_static(b"x"))
                .await
                .expect("put");
        }

        let listed = store
            .list_objects("bucket", "t/day=1/")
            .await
            .expect("list");
        assert_eq!(listed, vec!["t/day=1/a.parquet", "t/day=1/b.parquet"]);
    }

    #[tokio::test]
    async fn memory_store_get_missing_is_not_found() {
        let store = MemoryBucketStore::new();
        let err = store.get_object("bucket", "absent").await.unwrap_err();
        assert!(matches!(err, BucketError::NotFound(_)));
    }

    #[tokio::test]
    async fn memory_store_delete_many() {
        let store = MemoryBucketStore::new();
        for key in ["a", "b", "c"] {
            store
                .put_object("bucket", key, Bytes::from_static(b"x"))
                .await
                .expect("put");
        }
        store
            .delete_objects("bucket", &["a".to_string(), "c".to_string()])
            .await
            .expect("delete");
        let listed = store.list_objects("bucket", "").await.expect("list");
        assert_eq!(listed, vec!["b"]);
    }
}
