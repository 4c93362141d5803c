use thiserror::Error;

/// Input and model validation failures shared by every layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("watched percentage must be between 0 and 100, got {0}")]
    WatchedPercentage(u32),

    #[error("lesson order must be >= 1")]
    InvalidOrder,

    #[error("invalid {field}: {value}")]
    Invalid { field: &'static str, value: String },
}
