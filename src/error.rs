use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound(_))
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => CatalogError::NotFound(err.to_string()),
            other => CatalogError::Backend(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => CatalogError::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => CatalogError::Conflict(err.to_string()),
            _ => CatalogError::Backend(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Backend(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CatalogError {
    fn from(err: tokio::task::JoinError) -> Self {
        CatalogError::Backend(format!("background task failed: {err}"))
    }
}

/// Failure of a cache invalidation signal. Kept apart from [`CatalogError`]
/// so it can never be reported as a failed mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidationError {
    #[error("http error: {0}")]
    Http(String),
    #[error("revalidation rejected: {0}")]
    Rejected(String),
    #[error("invalidation sink unavailable: {0}")]
    Unavailable(String),
}
