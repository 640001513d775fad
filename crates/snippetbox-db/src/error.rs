use thiserror::Error;

/// Errors surfaced by the snippet and user stores. Handlers match on the
/// first three variants; everything else is an internal failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no matching record found")]
    NoRecord,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("duplicate email")]
    DuplicateEmail,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Other(e.into())
    }
}
