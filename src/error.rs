use thiserror::Error;

use crate::tunnel::Direction;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Malformed tunnel target: {0}")]
    MalformedTarget(String),

    #[error("Failed to connect to {target}: {source}")]
    DialFailure {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write tunnel handshake: {0}")]
    HandshakeWriteFailure(#[source] std::io::Error),

    #[error("Relay {direction} failed: {source}")]
    RelayIo {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Status sent to the client when the error aborts a session before relaying.
    pub fn status(&self) -> http::StatusCode {
        match self {
            TunnelError::MalformedTarget(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
            TunnelError::DialFailure { .. } | TunnelError::HandshakeWriteFailure(_) => {
                http::StatusCode::BAD_GATEWAY
            }
            TunnelError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            TunnelError::RelayIo { .. } | TunnelError::Io(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
