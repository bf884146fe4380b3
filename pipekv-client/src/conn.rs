//! # Connection
//!
//! Purpose: Own one duplex RESP2 byte stream, splitting it into buffered
//! read and write halves and tracking whether it is still trustworthy.
//!
//! ## Design Principles
//! 1. **Buffered Halves**: `BufReader`/`BufWriter` over one TCP stream keep
//!    syscalls low while letting writes stream without full buffering.
//! 2. **Broken Means Gone**: Any IO or framing fault marks the connection
//!    broken so the pool discards it instead of reusing a desynced stream.
//! 3. **Server Errors Are Data**: An error reply leaves the stream in a
//!    well-defined state and does not poison the connection.

use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use pipekv_resp as resp;
use pipekv_resp::Reply;

use crate::action::{Action, Request};
use crate::error::{ClientError, ClientResult};

/// Dial configuration for a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            addr: "127.0.0.1:6379".to_string(),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Single TCP connection with reusable buffers.
///
/// The scratch line buffer lives on the connection to avoid per-reply
/// allocations.
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    line_buf: Vec<u8>,
    broken: bool,
}

impl Connection {
    /// Dials the configured address and prepares buffered halves.
    pub fn connect(config: &ConnectionConfig) -> ClientResult<Self> {
        let addr = resolve(&config.addr)?;
        let stream = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let write_half = stream.try_clone()?;
        Ok(Connection {
            reader: BufReader::new(stream),
            writer: BufWriter::new(write_half),
            line_buf: Vec::with_capacity(128),
            broken: false,
        })
    }

    /// True once an IO or framing fault has left the stream unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Performs an action on this connection.
    pub fn run(&mut self, action: &mut dyn Action) -> ClientResult<()> {
        action.run(self)
    }

    /// Writes a request's frames without flushing, for batched write bursts.
    pub fn write_request(&mut self, req: &dyn Request) -> ClientResult<()> {
        if let Err(err) = req.write_request(&mut self.writer) {
            self.broken = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Flushes buffered request bytes to the server.
    pub fn flush(&mut self) -> ClientResult<()> {
        if let Err(err) = self.writer.flush() {
            self.broken = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Writes one request and flushes it.
    pub fn send(&mut self, req: &dyn Request) -> ClientResult<()> {
        self.write_request(req)?;
        self.flush()
    }

    /// Reads one reply, surfacing server error replies as [`ClientError::Server`].
    ///
    /// The error frame is fully consumed first, so the stream stays aligned
    /// and the connection remains usable after an application error.
    pub fn read_reply(&mut self) -> ClientResult<Reply> {
        match resp::read_reply(&mut self.reader, &mut self.line_buf) {
            Ok(Reply::Error(message)) => {
                Err(ClientError::Server(String::from_utf8_lossy(&message).into_owned()))
            }
            Ok(reply) => Ok(reply),
            Err(err) => {
                self.broken = true;
                Err(err.into())
            }
        }
    }
}

fn resolve(addr: &str) -> ClientResult<SocketAddr> {
    let mut candidates = addr.to_socket_addrs()?;
    candidates.next().ok_or_else(|| {
        ClientError::InvalidArgument(format!("address resolves to nothing: {addr}"))
    })
}
