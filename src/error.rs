use crate::linalg::faer_ndarray::FaerLinalgError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("ROC curve has {available} point(s); at least two are needed to integrate")]
    InsufficientPoints { available: usize },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),
}
