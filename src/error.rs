use thiserror::Error;

/// Failures raised while anonymizing one record type.
///
/// None of these are retryable. The pipeline aborts the affected record type
/// and leaves the others in the batch untouched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnonymizationError {
    /// The policy pairs a technique with a data type it cannot handle.
    #[error("No {technique} possible for type {data_type}")]
    UnsupportedCombination { technique: String, data_type: String },

    /// The policy names a technique that does not exist.
    #[error("No anonymization implementation for {technique}")]
    UnknownTechnique { technique: String },

    /// A column holds a value that does not fit the declared data type.
    #[error("Attribute {attribute}: {value} is not a valid {expected}")]
    TypeMismatch {
        attribute: String,
        value: String,
        expected: &'static str,
    },

    /// Nothing to work on where an input was required.
    #[error("Empty input: {context}")]
    EmptyInput { context: String },
}

pub type Result<T> = std::result::Result<T, AnonymizationError>;
