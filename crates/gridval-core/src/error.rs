//! Unified error type for the gridval crates
//!
//! Engine-facing operations return [`GridvalResult`]. Each variant belongs to
//! exactly one [`ErrorKind`] so callers can tell a rejected request from missing
//! data or a broken deployment without matching on message text.
//!
//! Degraded results (no feeder match, a far substation, an ISO-only fallback)
//! are not errors. They travel as warnings inside successful responses.
//!
//! # Example
//!
//! ```
//! use gridval_core::{ErrorKind, GridvalError, GridvalResult};
//!
//! fn check_capacity(mw: f64) -> GridvalResult<f64> {
//!     if mw > 0.0 && mw.is_finite() {
//!         Ok(mw)
//!     } else {
//!         Err(GridvalError::InvalidCapacity(mw))
//!     }
//! }
//!
//! let err = check_capacity(0.0).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::InputValidation);
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Broad failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request rejected before any computation
    InputValidation,
    /// Backing data missing; never approximated
    DataAvailability,
    /// Inconsistent or missing configuration; fatal at startup
    Configuration,
    /// I/O, parsing and other plumbing failures
    Internal,
}

/// Unified error type for all gridval operations.
#[derive(Error, Debug)]
pub enum GridvalError {
    /// Latitude outside [-90, 90] or longitude outside [-180, 180]
    #[error("invalid coordinate: ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },

    /// Capacity must be a positive, finite MW value
    #[error("invalid capacity: {0} MW (must be > 0)")]
    InvalidCapacity(f64),

    /// DER type not present in the configured profile table
    #[error("unsupported DER type: {0}")]
    UnsupportedDerType(String),

    /// Retrospective interval is empty or reversed
    #[error("invalid interval: start {start} is not before end {end}")]
    InvalidInterval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// At least one hour of the retrospective interval has no measured data
    #[error(
        "interval data unavailable for zone {zone_code}: {missing_hours} hour(s) missing, first at {first_missing}"
    )]
    IntervalDataUnavailable {
        zone_code: String,
        missing_hours: usize,
        first_missing: DateTime<Utc>,
    },

    /// Asset id not present in the registry
    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    /// Pipeline run id unknown or not completed
    #[error("pipeline run {0} not found or not completed")]
    PipelineRunNotFound(u64),

    /// No pipeline run has completed yet
    #[error("no completed pipeline run available")]
    NoCompletedRun,

    /// Other backing data the request needs is missing
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("parse error: {0}")]
    Parse(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

impl GridvalError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GridvalError::InvalidCoordinate { .. }
            | GridvalError::InvalidCapacity(_)
            | GridvalError::UnsupportedDerType(_)
            | GridvalError::InvalidInterval { .. } => ErrorKind::InputValidation,
            GridvalError::IntervalDataUnavailable { .. }
            | GridvalError::UnknownAsset(_)
            | GridvalError::PipelineRunNotFound(_)
            | GridvalError::NoCompletedRun
            | GridvalError::DataUnavailable(_) => ErrorKind::DataAvailability,
            GridvalError::Config(_) => ErrorKind::Configuration,
            GridvalError::Io(_) | GridvalError::Parse(_) | GridvalError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Convenience type alias for Results using GridvalError.
pub type GridvalResult<T> = Result<T, GridvalError>;

impl From<anyhow::Error> for GridvalError {
    fn from(err: anyhow::Error) -> Self {
        GridvalError::Other(err.to_string())
    }
}

impl From<serde_json::Error> for GridvalError {
    fn from(err: serde_json::Error) -> Self {
        GridvalError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for GridvalError {
    fn from(err: toml::de::Error) -> Self {
        GridvalError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GridvalError::UnsupportedDerType("fusion".into());
        assert!(err.to_string().contains("unsupported DER type"));
        assert!(err.to_string().contains("fusion"));
    }

    #[test]
    fn test_kinds_follow_taxonomy() {
        assert_eq!(
            GridvalError::InvalidCoordinate { lat: 91.0, lon: 0.0 }.kind(),
            ErrorKind::InputValidation
        );
        assert_eq!(
            GridvalError::UnknownAsset("a".into()).kind(),
            ErrorKind::DataAvailability
        );
        assert_eq!(
            GridvalError::PipelineRunNotFound(3).kind(),
            ErrorKind::DataAvailability
        );
        assert_eq!(
            GridvalError::Config("bad".into()).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GridvalError = io_err.into();
        assert!(matches!(err, GridvalError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
