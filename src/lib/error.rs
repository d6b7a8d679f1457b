use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid observation at index {index}: {successes} successes out of {trials} trials")]
    InvalidObservation {
        index: usize,
        successes: i64,
        trials: i64,
    },

    #[error("No observations supplied, cannot fit a beta-binomial model")]
    EmptyInput,

    #[error("Fit did not converge after {iterations} iterations")]
    FitDidNotConverge { iterations: usize },

    #[error("Invalid fit option: {reason}")]
    InvalidOption { reason: String },

    #[error("Could not parse line {line}: {reason}")]
    Parse { line: u64, reason: String },

    #[error("Column not found in header: {0}")]
    MissingColumn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
