//! Error types for the measurement core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("wireless radio is off: {0}")]
    RadioOff(String),

    #[error("network query failed: {0}")]
    NetworkQuery(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("malformed probe result: {0}")]
    MalformedResult(String),

    #[error("network changed during measurement (before: {before:?}, after: {after:?})")]
    EnvironmentDrift {
        before: Option<String>,
        after: Option<String>,
    },

    #[error("record store I/O error: {0}")]
    Store(#[from] std::io::Error),

    #[error("record store CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }
}
