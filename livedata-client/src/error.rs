//! Client error type.

/// Errors returned by [`LiveClient`](crate::LiveClient) and the transport.
#[derive(Debug, thiserror::Error)]
pub enum LiveDataError {
    /// A local method handler with this name already exists.
    #[error("A method named '{0}' is already defined")]
    DuplicateMethod(String),

    /// A server-backed collection with this name already exists.
    #[error("There is already a remote collection '{0}'")]
    DuplicateCollection(String),

    /// `autosubscribe` was called from inside an autosubscribe body.
    #[error("autosubscribe may not be called recursively")]
    NestedCapture,

    #[error("unknown autosubscription {0}")]
    UnknownAutosubscription(u64),

    /// WebSocket failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveDataError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        LiveDataError::Transport(e.to_string())
    }
}
