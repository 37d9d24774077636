use thiserror::Error;

/// Why a submitted object was rejected by validation.
///
/// Carried per object: a rejection becomes a failure entry in the add
/// request's status record and never aborts the rest of the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed object id: {0}")]
    MalformedId(String),

    #[error("Malformed {field} timestamp: {value}")]
    MalformedTimestamp { field: &'static str, value: String },

    #[error("Media type {0} is not accepted by this collection")]
    UnsupportedType(String),
}

#[derive(Error, Debug)]
pub enum TaxiiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Unable to process request: {0}")]
    Processing(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

impl TaxiiError {
    /// Convenience for the common "<kind> <id> not found" shape.
    pub fn not_found(what: impl Into<String>) -> Self {
        TaxiiError::NotFound(what.into())
    }
}

pub type Result<T> = std::result::Result<T, TaxiiError>;
