use thiserror::Error;

/// Error types for wire-level parsing and encoding.
#[derive(Debug, Error)]
pub enum Error {
    #[error("packet too short: need at least {need} bytes, got {got}")]
    PacketTooShort { need: usize, got: usize },

    #[error("invalid length field: {0}")]
    InvalidLength(u16),

    #[error("data parse error: {0}")]
    BinRwError(#[from] binrw::Error),

    #[error("malformed command entry at offset {0}")]
    MalformedCommand(usize),

    #[error("invalid vMix line: {0:?}")]
    InvalidVmixLine(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("malformed websocket frame")]
    MalformedFrame,

    #[error("unexpected obs-websocket opcode: {0}")]
    UnexpectedOpcode(u8),

    #[error("obs-websocket request failed with status code {0}")]
    RequestFailed(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
