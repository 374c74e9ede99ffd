//! Error types for the aggregator

use thiserror::Error;

/// Main error type for the aggregator
#[derive(Error, Debug)]
pub enum Error {
    /// Label list validation failed
    #[error("Label error: {0}")]
    Label(#[from] LabelError),

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Validation(#[from] ValidationError),

    /// Registry rejected a new entry
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Push sink failure
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Background service lifecycle failure
    #[error("Service error: {0}")]
    Service(#[from] crate::services::ServiceError),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Label name/value validation errors
///
/// Raised when a child builder or recorder builder is finished with a label
/// set that cannot identify a series.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// Label values were supplied without label names
    #[error("label names have not been assigned")]
    MissingNames,

    /// Label names and label values have different lengths
    #[error("incorrect number of labels: {names} names, {values} values")]
    CountMismatch {
        /// Number of label names
        names: usize,
        /// Number of label values
        values: usize,
    },

    /// A label name is empty
    #[error("label name at position {0} is empty")]
    EmptyName(usize),

    /// A label value is empty
    #[error("label value for '{0}' is empty")]
    EmptyValue(String),

    /// A label name appears more than once
    #[error("label name '{0}' is repeated")]
    DuplicateName(String),

    /// The reserved quantile label was used on a summary child
    #[error("label name '{0}' is reserved")]
    ReservedName(String),

    /// Index name contains no usable characters after sanitation
    #[error("index name '{0}' is empty after sanitation")]
    EmptyIndexName(String),
}

/// Validation errors
///
/// Error type for configuration and quantile definitions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid format
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat {
        /// Field name being validated
        field: String,
        /// Description of the format error
        message: String,
    },
}

impl ValidationError {
    /// Shorthand for a numeric range violation
    pub fn out_of_range(
        field: &str,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
    ) -> Self {
        ValidationError::OutOfRange {
            field: field.to_string(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }
}

/// Registry capacity errors
///
/// Never surfaced to producers; the ingestion worker logs and drops the record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The count registry already tracks the maximum number of index names
    #[error("count index map is full ({size} indexes)")]
    IndexCapacity {
        /// Current number of indexes
        size: usize,
    },

    /// A bean map already tracks the maximum number of series
    #[error("series map '{index}' is full ({size} series)")]
    SeriesCapacity {
        /// Index name, or `delay` for the delay registry
        index: String,
        /// Current number of series
        size: usize,
    },
}

impl RegistryError {
    /// Drop reason label used in self-telemetry
    pub fn reason(&self) -> &'static str {
        match self {
            RegistryError::IndexCapacity { .. } => "index_capacity",
            RegistryError::SeriesCapacity { .. } => "series_capacity",
        }
    }
}

/// Push sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// Transport-level failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend refused the request
    #[error("rejected by backend: {0}")]
    Rejected(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
