use thiserror::Error;

#[derive(Error, Debug)]
pub enum LensError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Aggregation invariant violated: {0}")]
    AggregationInvariantViolation(String),

    #[error("Session busy: a question is already awaiting an answer")]
    SessionBusy,

    #[error("Session closed")]
    SessionClosed,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The pending answer was abandoned via `Session::cancel`.
    #[error("Request discarded")]
    Discarded,

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LensError {
    /// Failures a session turns into a user-safe apology instead of raising.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LensError::DataUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, LensError>;
