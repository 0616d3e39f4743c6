use std::sync::Arc;

/// Represents a result type for operations in this crate.
///
/// Delivery operations never return it: event delivery is best-effort and failures are logged
/// instead. Context resolution does, so callers can decide what to do with a bad context.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// No context was supplied to the context processor.
    #[error("context not specified")]
    ContextNotSpecified,

    /// The context has no key and is not marked transient/anonymous, or is otherwise malformed.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// Events or context could not be (de)serialized.
    #[error(transparent)]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    Serialization(Arc<serde_json::Error>),

    /// Persistent storage backend failed.
    #[error("persistent storage error: {0}")]
    Storage(String),
}

impl Error {
    pub(crate) fn missing_key() -> Error {
        Error::InvalidContext("key-less context is not marked transient/anonymous".to_owned())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        // Event URLs may carry the environment id, don't leak it into logs.
        Error::Network(Arc::new(value.without_url()))
    }
}
