//! # RESP2 Wire Codec
//!
//! Purpose: Encode request frames and parse server replies for the PipeKV
//! client, keeping the wire format out of the connection and pooling logic.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Callers provide scratch buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing surfaces a frame error immediately.

mod decode;
mod encode;
mod error;
mod reply;

pub use decode::read_reply;
pub use encode::{
    write_array_header, write_bulk_bytes, write_bulk_int, write_bulk_stream, write_bulk_string,
};
pub use error::WireError;
pub use reply::Reply;
