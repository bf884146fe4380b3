use std::io;

use pipekv_resp::WireError;
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
///
/// Faults are always returned to the immediate caller; nothing is retried
/// here except the script digest fallback in [`crate::ScriptCall`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while dialing, reading, or writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// RESP2 framing violation reported by the wire codec.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    /// Error reply reported by the server.
    #[error("server error: {0}")]
    Server(String),
    /// Caller-supplied input rejected at construction time.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
