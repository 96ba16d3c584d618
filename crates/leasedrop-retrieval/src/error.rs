use leasedrop_core::ErrorKind;
use thiserror::Error;

/// Errors raised while turning a results page into rows.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("No recognizable results table: {0}")]
    Parse(String),

    #[error("Results table has no period column or period markers")]
    NoPeriodColumn,
}

impl RetrievalError {
    /// Failure class reported to callers; every extraction failure is fatal.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Parse
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
