//! Error types for the Temple workspace.

use thiserror::Error;

/// Top-level error type for fallible, non-combat operations
/// (configuration loading, scenario setup).
#[derive(Debug, Error)]
pub enum TempleError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config text could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Config value outside its allowed range
    #[error("Invalid config value for `{field}`: {reason}")]
    InvalidConfig {
        /// Offending field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Scenario referenced something that does not exist
    #[error("Scenario error: {0}")]
    Scenario(String),
}

/// Result type alias for Temple operations.
pub type TempleResult<T> = Result<T, TempleError>;
