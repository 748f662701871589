//! Core pipeline for the bets lakehouse: raw promotion, normalization,
//! deduplication, correction reconciliation and partition merging on top of
//! an object store.

pub mod config;
pub mod control;
pub mod corrections;
pub mod dedupe;
pub mod error;
pub mod merge;
pub mod normalize;
pub mod partition;
pub mod promote;
pub mod run;
pub mod schema;
pub mod transform;

pub use config::Config;
pub use error::{PipelineError, Result};
