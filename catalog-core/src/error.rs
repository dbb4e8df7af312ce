use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type shared by every catalog-* crate.
///
/// Each downstream crate maps its own failures into one of these variants
/// so callers can match on a single enum regardless of which adapter raised
/// the error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("search index error: {0}")]
    Index(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("pipeline already running")]
    AlreadyRunning,
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
