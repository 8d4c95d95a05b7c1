//! Error types

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<Error> for dgen_security::Error {
    fn from(e: Error) -> Self {
        dgen_security::Error::Storage(e.to_string())
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
