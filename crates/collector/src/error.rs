//! Error types for the collector

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Attachment body decode error: {0}")]
    Decode(String),

    #[error("Malformed event on line {line}: {reason}")]
    MalformedEvent { line: usize, reason: String },

    #[error("Could not allocate a unique attachment name for {0}")]
    NameExhausted(String),

    #[error(transparent)]
    Common(#[from] playreport_common::Error),
}

impl From<base64::DecodeError> for CollectorError {
    fn from(e: base64::DecodeError) -> Self {
        CollectorError::Decode(e.to_string())
    }
}

pub type CollectorResult<T> = Result<T, CollectorError>;
