//! Error types for control operations

use thiserror::Error;

/// Errors that can occur during control operations
#[derive(Debug, Error)]
pub enum ControlError {
    /// I/O error communicating with the control socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    ProtocolDeserialization(#[from] bincode::error::DecodeError),

    #[error("Protocol error: {0}")]
    ProtocolSerialization(#[from] bincode::error::EncodeError),

    /// A frame larger than the receiving side accepts
    #[error("Frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: u64, limit: u32 },

    #[error("Incompatible protocol version: peer={peer}, local={local}")]
    VersionMismatch { peer: u32, local: u32 },

    /// The server refused the request's credentials
    #[error("Unauthorised: {0}")]
    Unauthorised(String),

    /// Server returned an error
    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout")]
    Timeout,

    /// Control socket path is invalid
    #[error("Invalid socket path: {0}")]
    InvalidSocketPath(String),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
