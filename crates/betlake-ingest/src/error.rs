use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream API returned status {status}")]
    Api { status: u16 },

    #[error("bucket operation failed: {0}")]
    Bucket(#[from] betlake_bucket::BucketError),

    #[error("polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] betlake_core::PipelineError),

    #[error("ingestion state error: {0}")]
    State(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
