//! ADC control error types

use thiserror::Error;

/// Result type for ADC control operations
pub type AdcResult<T> = Result<T, AdcError>;

/// Errors that can occur while configuring or calibrating the ADC
#[derive(Error, Debug)]
pub enum AdcError {
    /// Requested register value outside the device domain; rejected before
    /// any hardware write
    #[error("{field} value {value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A mode bit pattern or mode name not in the closed enumeration
    #[error("invalid {what} mode: {name}")]
    InvalidMode { what: &'static str, name: String },

    /// Persisted snapshot is missing a required field
    #[error("register snapshot missing required field '{0}'")]
    IncompleteSnapshot(String),

    /// Persisted snapshot contains a field this model version does not know
    #[error("register snapshot contains unknown field '{0}'")]
    UnknownField(String),

    /// Persisted snapshot field holds a value of the wrong shape
    #[error("register snapshot field '{field}' is not {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
    },

    /// Device link failure (register write or clock-manager reset)
    #[error("device link failure: {0}")]
    Link(String),

    /// Spectral estimation failure
    #[error(transparent)]
    Spectrum(#[from] iqcal_core::SpectrumError),

    /// Snapshot file I/O failure
    #[error("snapshot file error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot is not a valid JSON document
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
