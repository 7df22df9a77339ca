use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptobotError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV Parsing Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Dilution Error: {0}")]
    Dilution(String),

    #[error("Measurement Shape Error: expected {expected_rows}x{expected_cols}, {detail}")]
    MeasurementShape {
        expected_rows: usize,
        expected_cols: usize,
        detail: String,
    },

    #[error("Measurement Error: {0}")]
    Measurement(String),

    #[error("Objective Error: {0}")]
    Objective(String),

    #[error("Timed out after {after:?} waiting for: {step}")]
    Timeout { step: String, after: Duration },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Persistence Error ({path}): {reason}")]
    Persistence { path: String, reason: String },

    #[error("Dispense Error: {0}")]
    Dispense(String),

    #[error("Dispense interrupted after {issued_transfers} transfer(s) were issued: {reason}")]
    PartialDispense {
        issued_transfers: usize,
        reason: String,
    },

    #[error("Iteration Error: {0}")]
    Iteration(String),

    #[error("Data Validation Error: {0}")]
    Validation(String),
}

impl OptobotError {
    pub fn persistence<P: AsRef<Path>>(path: P, reason: impl ToString) -> Self {
        Self::Persistence {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// True when the failed iteration left no committed state behind and can be
    /// re-run with the same iteration counter. A dispense that already moved
    /// liquid is never retryable: its wells are no longer empty.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Cancelled(_)
                | Self::Persistence { .. }
                | Self::Dispense(_)
                | Self::Measurement(_)
        )
    }
}

pub type OptResult<T> = Result<T, OptobotError>;
