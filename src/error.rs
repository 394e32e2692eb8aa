use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration problems. All of these abort before any file or network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("HMAC_SECRET environment variable is required")]
    MissingSecret,
    #[error("batch size must be at least 1 (got {0})")]
    InvalidBatchSize(i64),
    #[error("speed multiplier must be a finite number (got {0})")]
    InvalidSpeed(f64),
    #[error("invalid {which} timestamp: {value}")]
    InvalidBound { which: &'static str, value: String },
    #[error("start timestamp {start} is after end timestamp {end}")]
    InvertedRange { start: String, end: String },
    #[error("invalid API base URL {url}: {reason}")]
    InvalidApiUrl { url: String, reason: String },
    #[error("invalid request timeout {0:?}; expected a positive number of seconds")]
    InvalidTimeout(String),
}

/// Source-level failures while loading readings. Row-level problems are not errors.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("CSV file not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("error reading CSV file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV must contain columns timestamp, sensor_id and temperature_c (or value); missing: {}", .missing.join(", "))]
    MissingColumns { missing: Vec<String> },
    #[error("error reading CSV: {0}")]
    Csv(#[from] csv::Error),
}
