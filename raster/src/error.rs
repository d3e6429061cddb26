use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RasterError {
    #[error("{formula} needs band {band}, missing from stack {stack}")]
    MissingBand {
        formula: String,
        band: String,
        stack: String,
    },
    #[error("Grid mismatch in {context}: expected {expected}, got {actual}")]
    GridMismatch {
        context: String,
        expected: String,
        actual: String,
    },
    #[error("Empty collection: {context}")]
    EmptyCollection { context: String },
    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, RasterError>;
