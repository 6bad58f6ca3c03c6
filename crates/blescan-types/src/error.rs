//! Error types for data parsing in blescan-types.

use thiserror::Error;

/// Errors that can occur when decoding blescan wire data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A mesh line did not contain the expected number of fields.
    #[error("Invalid field count: expected {expected}, got {actual}")]
    FieldCount {
        /// Number of fields in the fixed layout.
        expected: usize,
        /// Number of fields found in the input.
        actual: usize,
    },

    /// A single field could not be parsed.
    #[error("Invalid value for field '{field}': {value:?}")]
    InvalidField {
        /// Name of the field in the fixed layout.
        field: &'static str,
        /// The raw text that failed to parse.
        value: String,
    },
}

/// Result type alias using blescan-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
