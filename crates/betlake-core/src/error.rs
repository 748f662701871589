use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("bucket operation failed: {0}")]
    Bucket(#[from] betlake_bucket::BucketError),

    #[error("polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("no data found at {0}")]
    NotFound(String),

    #[error("business error [{code}]: {message}")]
    Business { code: &'static str, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Wraps a control-log failure with its operator-facing error code.
    pub fn business(code: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Business {
            code,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
