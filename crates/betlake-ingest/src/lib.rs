//! Online ingestion: follows the upstream bets feed by rowversion tag and
//! lands day-partitioned parquet objects for the raw promotion stage.

pub mod api;
pub mod error;
pub mod poller;
pub mod state;
pub mod writer;

pub use error::{IngestError, Result};
pub use poller::{IngestConfig, Poller};
