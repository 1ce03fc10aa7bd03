use thiserror::Error;

/// Error taxonomy surfaced by the facade and by each backend client.
#[derive(Debug, Error)]
pub enum Error {
    /// Null handle, empty host, out-of-range input, or a control operation
    /// the selected backend cannot express in its current state (e.g.
    /// `auto()` on an OBS connection that isn't in studio mode).
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// The switcher type or operation isn't implemented (the reserved
    /// `OSEE` backend tag, for example).
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// A blocking wait (`connect`, `wait_initialized`) exceeded its budget.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Any socket failure, protocol violation or unexpected wire format.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] mixlink_protocol::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The backend's background task is gone; its command channel is closed.
    #[error("client task is not running")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, Error>;
