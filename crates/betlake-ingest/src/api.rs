//! Client for the upstream bets feed. The feed is a long-poll style endpoint
//! keyed by a rowversion tag: each call returns every record modified after
//! the given tag plus the new high-water marks.

use serde::Deserialize;
use tracing::debug;

use crate::error::{IngestError, Result};

/// One page of the feed.
#[derive(Debug, Deserialize)]
pub struct BetsResponse {
    /// Highest rowversion tag contained in this page.
    #[serde(rename = "maxTimestamp")]
    pub max_timestamp: String,
    /// Upstream replication clock; used for the ingestion delay gate.
    #[serde(rename = "maxMobiusModifiedOn")]
    pub max_mobius_modified_on: String,
    pub bets: Vec<serde_json::Value>,
}

pub struct ApiClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ApiClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Fetches every record modified after `timestamp`.
    pub async fn fetch_since(&self, timestamp: &str) -> Result<BetsResponse> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("timestamp", timestamp)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Api {
                status: status.as_u16(),
            });
        }

        let page: BetsResponse = response.json().await?;
        debug!(
            records = page.bets.len(),
            max_timestamp = %page.max_timestamp,
            "feed page received"
        );
        Ok(page)
    }
}
