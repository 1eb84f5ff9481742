//! Error kinds surfaced by the cloud durability core.

use thiserror::Error;

/// Errors surfaced by the cloud durability core.
#[derive(Debug, Error)]
pub enum Error {
    /// A file or object was absent where absence is a meaningful outcome.
    #[error("not found: {0}")]
    NotFound(String),
    /// Configuration is inconsistent with the observed local or cloud state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The requested cloud backend is not supported.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Object store failure.
    #[error("object store error: {0}")]
    ObjectStore(object_store::Error),
    /// The cloud manifest failed to serialize or deserialize.
    #[error("cloud manifest codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// An on-disk record stream failed its integrity checks.
    #[error("corruption: {0}")]
    Corruption(String),
    /// A copy worker terminated abnormally.
    #[error("worker join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// True when the error denotes a missing file or object, regardless of
    /// which storage layer reported it.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => Error::NotFound(path),
            other => Error::ObjectStore(other),
        }
    }
}

/// Convenience result alias for cloud database operations.
pub type Result<T> = std::result::Result<T, Error>;
