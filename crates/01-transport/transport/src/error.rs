use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

/// Failures reported by frame sinks and sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport was shut down locally. Receivers treat this as the end of the stream.
    #[error("transport closed")]
    Closed,

    #[error("peer disconnected")]
    Disconnected,

    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Recv(String),

    #[error("no route for identity {0:?}")]
    UnknownRoute(String),
}

impl TransportError {
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}
