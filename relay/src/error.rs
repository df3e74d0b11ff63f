use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),
    #[error("stored timestamp out of range: {0}")]
    Timestamp(i64),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("failed to persist reading: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown metric: {0}")]
pub struct UnknownMetric(pub String);
