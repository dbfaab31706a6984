use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid dimension name {0:?}: must contain at least one alphanumeric character")]
    InvalidDimension(String),

    #[error("Invalid period label {0:?}: must not be empty")]
    InvalidPeriod(String),

    #[error("Invalid low confidence threshold {0}: must be between 0.0 and 1.0")]
    InvalidConfidenceThreshold(f64),

    #[error("Workbook payload is malformed: {0}")]
    MalformedWorkbook(String),

    #[error("Report verification failed for row '{row}' in period '{period}': {details}")]
    VerificationFailed {
        row: String,
        period: String,
        details: String,
    },

    #[error("Persistence endpoint error: {0}")]
    Transport(String),

    #[cfg(feature = "remote")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;
