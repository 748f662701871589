//! Resume state recovered from the object keys already written: each part
//! file name carries the modify-date range it covers and the rowversion tag
//! it ended on, so a restarted poller continues where the last one stopped.

use chrono::{Duration, NaiveDateTime, Utc};
use chrono_tz::Etc::GMTPlus4;
use tracing::info;

use betlake_core::normalize::format_tstamp;

use crate::error::{IngestError, Result};

const FILE_STAMP_PATTERN: &str = "%Y%m%d%H%M%S";
const PART_SUFFIX: &str = ".snappy.parquet";

/// Where a restarted poller picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeState {
    /// Highest modify date covered by the stored files, if any exist yet.
    pub max_modify_date: Option<String>,
    /// Rowversion tag to resume fetching from.
    pub max_tstamp: String,
}

/// `part_<start>-<end>_<tstamp>.snappy.parquet` -> (`end`, `tstamp`).
fn parse_part_key(key: &str) -> Option<(NaiveDateTime, String)> {
    let file_name = key.rsplit('/').next()?;
    let stem = file_name.strip_suffix(PART_SUFFIX)?;
    let mut segments = stem.split('_');
    if segments.next()? != "part" {
        return None;
    }
    let range = segments.next()?;
    let tstamp = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let end = range.rsplit('-').next()?;
    let end = NaiveDateTime::parse_from_str(end, FILE_STAMP_PATTERN).ok()?;
    Some((end, tstamp.to_string()))
}

/// Recovers the resume point from the keys already in the store. With no
/// stored files the caller must provide an initial rowversion tag.
pub fn resume_state(keys: &[String], initial_timestamp: Option<&str>) -> Result<ResumeState> {
    let latest = keys
        .iter()
        .filter_map(|key| parse_part_key(key))
        .max_by_key(|(end, _)| *end);

    match latest {
        Some((end, tstamp)) => {
            let state = ResumeState {
                max_modify_date: Some(end.format("%Y-%m-%dT%H:%M:%S.000").to_string()),
                max_tstamp: format_tstamp(&tstamp),
            };
            info!(
                max_modify_date = state.max_modify_date.as_deref().unwrap_or(""),
                max_tstamp = %state.max_tstamp,
                "resume state recovered from stored files"
            );
            Ok(state)
        }
        None => match initial_timestamp {
            Some(timestamp) => Ok(ResumeState {
                max_modify_date: None,
                max_tstamp: format_tstamp(timestamp),
            }),
            None => Err(IngestError::State(
                "no stored files and no initial timestamp given".to_string(),
            )),
        },
    }
}

/// Parses an ISO timestamp with or without fractional seconds.
pub fn parse_iso_timestamp(raw: &str) -> Result<NaiveDateTime> {
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Ok(parsed);
        }
    }
    Err(IngestError::State(format!("invalid timestamp '{raw}'")))
}

/// Whether the upstream replication clock is at least `delay_minutes` behind
/// now. The feed reports wall clock in the upstream UTC-4 offset.
pub fn is_old_enough(timestamp: &str, delay_minutes: i64) -> Result<bool> {
    let now = Utc::now().with_timezone(&GMTPlus4).naive_local();
    let moment = parse_iso_timestamp(timestamp)?;
    Ok(now - moment > Duration::minutes(delay_minutes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumes_from_the_latest_end_stamp() {
        let keys = vec![
            "zero/bets/day=20240301/batch=20240301120000/part_20240301110000-20240301115959_0x00000000029F6BCD.snappy.parquet".to_string(),
            "zero/bets/day=20240301/batch=20240301130000/part_20240301120000-20240301125959_0x00000000029F6C10.snappy.parquet".to_string(),
        ];

        let state = resume_state(&keys, None).expect("resume");
        assert_eq!(
            state.max_modify_date.as_deref(),
            Some("2024-03-01T12:59:59.000")
        );
        assert_eq!(state.max_tstamp, "0x00000000029F6C10");
    }

    #[test]
    fn malformed_keys_are_ignored() {
        let keys = vec![
            "zero/bets/day=20240301/notes.txt".to_string(),
            "zero/bets/day=20240301/batch=20240301120000/part_20240301110000-20240301115959_0x0A.snappy.parquet".to_string(),
        ];
        let state = resume_state(&keys, None).expect("resume");
        assert_eq!(state.max_tstamp, "0x0A");
    }

    #[test]
    fn empty_store_requires_an_initial_timestamp() {
        let err = resume_state(&[], None).unwrap_err();
        assert!(matches!(err, IngestError::State(_)));

        let state = resume_state(&[], Some("00000000029f6bcd")).expect("resume");
        assert_eq!(state.max_modify_date, None);
        assert_eq!(state.max_tstamp, "0x00000000029F6BCD");
    }

    #[test]
    fn iso_timestamps_parse_with_and_without_fraction() {
        assert!(parse_iso_timestamp("2024-03-01T12:00:00").is_ok());
        assert!(parse_iso_timestamp("2024-03-01T12:00:00.123").is_ok());
        assert!(parse_iso_timestamp("not a timestamp").is_err());
    }

    #[test]
    fn ancient_timestamps_are_old_enough() {
        assert!(is_old_enough("2000-01-01T00:00:00", 3).expect("gate"));
    }
}
