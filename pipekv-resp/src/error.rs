use std::io;

use thiserror::Error;

/// Errors produced while encoding or decoding RESP2 frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// Underlying IO failure while reading or writing frames.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The byte stream violated RESP2 framing.
    #[error("invalid frame: {0}")]
    Frame(&'static str),
}
