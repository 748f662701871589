//! Long-poll ingestion loop: follow the feed's rowversion tag, buffer records
//! until a flush condition is met and write them as day/batch parquet
//! objects. Buffers are split on the modify-date day so no object ever spans
//! a day boundary.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

use betlake_bucket::BucketStore;
use betlake_core::normalize::{format_date, format_tstamp};
use betlake_core::schema::raw_schema;

use crate::api::ApiClient;
use crate::error::{IngestError, Result};
use crate::state::{is_old_enough, parse_iso_timestamp, resume_state};
use crate::writer::write_chunk;

/// Flush once a buffer grows past this many records.
const FETCH_CAP: usize = 4_999;
/// Backoff when the feed has nothing new or is still inside the delay gate.
const IDLE_BACKOFF: Duration = Duration::from_secs(60);
/// Backoff after a flush cycle that buffered nothing.
const EMPTY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub endpoint: String,
    pub bucket: String,
    /// Key prefix the day folders are written under, e.g. `zero/bets/`.
    pub prefix: String,
    pub delay_minutes: i64,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        let require = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.is_empty())
                .ok_or_else(|| IngestError::Configuration(format!("{name} must be set")))
        };

        let table = require("SOURCE_DB")?;
        Ok(Self {
            endpoint: require("ROOT_API_ENDPOINT")?,
            bucket: require("SOURCE_BUCKET")?,
            prefix: format!("{table}/bets/"),
            delay_minutes: match std::env::var("DELAY_TIME") {
                Ok(raw) => raw.parse().map_err(|_| {
                    IngestError::Configuration("DELAY_TIME must be an integer".to_string())
                })?,
                Err(_) => 3,
            },
        })
    }
}

fn modify_date(record: &Value) -> Option<&str> {
    record.get("modifyDate").and_then(Value::as_str)
}

fn day_of(timestamp: &str) -> Result<&str> {
    timestamp
        .get(..10)
        .ok_or_else(|| IngestError::State(format!("timestamp '{timestamp}' too short")))
}

/// Drops every field the raw schema does not declare. The feed adds fields
/// without notice; unknown ones must never reach the stored objects.
fn retain_schema_fields(records: &mut [Value]) {
    let allowed: HashSet<&str> = raw_schema().iter().map(|(name, _)| *name).collect();
    for record in records.iter_mut() {
        if let Value::Object(map) = record {
            map.retain(|key, _| allowed.contains(key.as_str()));
        }
    }
}

/// Highest modify date in the buffer, compared as parsed timestamps.
fn max_modify_date_of(records: &[Value]) -> Result<Option<String>> {
    let mut best: Option<(chrono::NaiveDateTime, String)> = None;
    for record in records {
        let Some(raw) = modify_date(record) else {
            continue;
        };
        let parsed = parse_iso_timestamp(&format_date(raw))?;
        if best.as_ref().map(|(moment, _)| parsed > *moment).unwrap_or(true) {
            best = Some((parsed, raw.to_string()));
        }
    }
    Ok(best.map(|(_, raw)| raw))
}

/// Splits records into those on or before the pivot day and those after it.
fn split_by_day(records: Vec<Value>, pivot_day: &str) -> Result<(Vec<Value>, Vec<Value>)> {
    let mut current = Vec::new();
    let mut next = Vec::new();
    for record in records {
        let day = modify_date(&record)
            .ok_or_else(|| IngestError::State("feed record missing modifyDate".to_string()))
            .and_then(day_of)?
            .to_string();
        if day.as_str() <= pivot_day {
            current.push(record);
        } else {
            next.push(record);
        }
    }
    Ok((current, next))
}

pub struct Poller {
    api: ApiClient,
    store: Arc<dyn BucketStore>,
    config: IngestConfig,
}

impl Poller {
    pub fn new(store: Arc<dyn BucketStore>, config: IngestConfig) -> Self {
        Self {
            api: ApiClient::new(config.endpoint.clone()),
            store,
            config,
        }
    }

    async fn flush(
        &self,
        records: &[Value],
        start_date: &str,
        end_date: &str,
        tstamp: &str,
    ) -> Result<()> {
        write_chunk(
            self.store.as_ref(),
            &self.config.bucket,
            &self.config.prefix,
            records,
            start_date,
            end_date,
            tstamp,
        )
        .await?;
        Ok(())
    }

    /// Runs the ingestion loop until an unrecoverable error occurs.
    pub async fn run(&self, initial_timestamp: Option<&str>) -> Result<()> {
        let keys = self
            .store
            .list_objects(&self.config.bucket, &self.config.prefix)
            .await?;
        let state = resume_state(&keys, initial_timestamp)?;
        let mut max_tstamp = state.max_tstamp;
        let mut max_modify_date = state.max_modify_date;

        loop {
            let mut current_day: Vec<Value> = Vec::new();
            let mut next_day: Vec<Value> = Vec::new();
            let mut initial_modify_date = max_modify_date.clone();

            loop {
                let page = self.api.fetch_since(&max_tstamp).await?;
                let new_tstamp = format_tstamp(&page.max_timestamp);

                let has_tag = new_tstamp.len() > 2;
                let settled = has_tag
                    && is_old_enough(&page.max_mobius_modified_on, self.config.delay_minutes)?;
                if !settled {
                    info!(
                        delay_minutes = self.config.delay_minutes,
                        "feed not settled yet, backing off"
                    );
                    sleep(IDLE_BACKOFF).await;
                    continue;
                }
                if new_tstamp == max_tstamp {
                    info!("no new records, backing off");
                    sleep(IDLE_BACKOFF).await;
                    continue;
                }
                if page.bets.is_empty() {
                    break;
                }

                let mut records = page.bets;
                retain_schema_fields(&mut records);

                let new_max_modify = max_modify_date_of(&records)?.ok_or_else(|| {
                    IngestError::State("feed page has no modifyDate values".to_string())
                })?;
                if initial_modify_date.is_none() {
                    initial_modify_date = modify_date(&records[0]).map(str::to_string);
                }
                let pivot_day = day_of(initial_modify_date.as_deref().ok_or_else(|| {
                    IngestError::State("feed record missing modifyDate".to_string())
                })?)?
                .to_string();

                let (mut current, mut next) = split_by_day(records, &pivot_day)?;
                current_day.append(&mut current);
                next_day.append(&mut next);

                max_tstamp = new_tstamp;
                max_modify_date = Some(new_max_modify);

                if current_day.len() + next_day.len() > FETCH_CAP {
                    break;
                }
            }

            if current_day.is_empty() && next_day.is_empty() {
                sleep(EMPTY_BACKOFF).await;
                continue;
            }

            let initial = initial_modify_date.clone().ok_or_else(|| {
                IngestError::State("buffered records without a start date".to_string())
            })?;
            let latest = max_modify_date.clone().ok_or_else(|| {
                IngestError::State("buffered records without an end date".to_string())
            })?;

            if day_of(&initial)? == day_of(&latest)? {
                self.flush(&current_day, &initial, &latest, &max_tstamp).await?;
            } else if current_day.is_empty() {
                let start = format!("{}T00:00:00.000", day_of(&latest)?);
                self.flush(&next_day, &start, &latest, &max_tstamp).await?;
            } else {
                // Day rollover inside one cycle: close out the old day, then
                // open the new one.
                let end = format!("{}T23:59:59.999", day_of(&initial)?);
                self.flush(&current_day, &initial, &end, &max_tstamp).await?;
                let start = format!("{}T00:00:00.000", day_of(&latest)?);
                self.flush(&next_day, &start, &latest, &max_tstamp).await?;
            }
            if !next_day.is_empty() {
                warn!(rows = next_day.len(), "day rollover flushed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_feed_fields_are_dropped() {
        let mut records = vec![json!({
            "customer": "a",
            "transId": 1,
            "brandNewField": true,
        })];
        retain_schema_fields(&mut records);

        let object = records[0].as_object().expect("object");
        assert!(object.contains_key("customer"));
        assert!(!object.contains_key("brandNewField"));
    }

    #[test]
    fn split_respects_the_pivot_day() {
        let records = vec![
            json!({"modifyDate": "2024-03-01T23:59:00"}),
            json!({"modifyDate": "2024-03-02T00:01:00"}),
            json!({"modifyDate": "2024-03-01T10:00:00"}),
        ];

        let (current, next) = split_by_day(records, "2024-03-01").expect("split");
        assert_eq!(current.len(), 2);
        assert_eq!(next.len(), 1);
        assert_eq!(
            modify_date(&next[0]),
            Some("2024-03-02T00:01:00")
        );
    }

    #[test]
    fn missing_modify_date_is_an_error() {
        let records = vec![json!({"customer": "a"})];
        assert!(split_by_day(records, "2024-03-01").is_err());
    }

    #[test]
    fn max_modify_date_handles_mixed_precision() {
        let records = vec![
            json!({"modifyDate": "2024-03-01T10:00:00"}),
            json!({"modifyDate": "2024-03-01T10:00:00.500"}),
            json!({"modifyDate": "2024-03-01T09:00:00.999"}),
        ];
        let max = max_modify_date_of(&records).expect("max");
        assert_eq!(max.as_deref(), Some("2024-03-01T10:00:00.500"));
    }
}
