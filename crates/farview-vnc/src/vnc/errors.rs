//! Error types for the VNC protocol stack.

use thiserror::Error;

/// Top-level VNC error.
///
/// The first four variants are the protocol taxonomy; none of them
/// triggers an internal retry — reconnect policy belongs to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VncError {
    /// RFB protocol violation: bad banner, refused handshake, corrupt framing.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The server rejected our credentials, or offered no usable security type.
    #[error("authentication error: {0}")]
    Auth(String),
    /// Network-level failure: timeout, reset, or closed socket.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server sent a framebuffer update we cannot decode.
    #[error("decode error: {0}")]
    Decode(String),
    /// Service-level lookup failure.
    #[error("session '{0}' not found")]
    SessionNotFound(String),
    /// A live session to the same endpoint already exists.
    #[error("already connected to {0}")]
    AlreadyConnected(String),
}

impl VncError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Decode errors are recoverable per update cycle; everything else
    /// tears the session down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

impl From<std::io::Error> for VncError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<VncError> for String {
    fn from(e: VncError) -> Self {
        e.to_string()
    }
}
