use thiserror::Error;

/// Store-level failures. `NotFound`, `Forbidden`, and `InvalidInput` are
/// caller mistakes and map onto the API error taxonomy; the rest are
/// infrastructure faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    InvalidInput(String),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
