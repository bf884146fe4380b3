//! # PipeKV Client
//!
//! Purpose: Execute units of work (single commands, flattened commands,
//! cached server-side scripts, ordered batches) against a RESP2 key-value
//! server over a bounded pool of reusable connections.
//!
//! ## Design Principles
//! 1. **Uniform Actions**: Every call shape goes through the same
//!    `{keys, run}` contract, so pooling and routing never special-case.
//! 2. **Round-Trip Economy**: Batches pipeline writes and reads into one
//!    network round-trip; scripts run by digest before shipping source.
//! 3. **Bounded Connections**: A fixed-capacity pool hands out lazily
//!    dialed connections and silently discards broken ones.
//! 4. **Errors Propagate**: Every fault returns to the caller unmodified;
//!    the only built-in retry is the script digest fallback.

mod action;
mod conn;
mod error;
mod pool;
mod script;

pub use action::{Action, Arg, Batch, Command, ConnCallback, FlatCommand, Request, StreamArg};
pub use conn::{Connection, ConnectionConfig};
pub use error::{ClientError, ClientResult};
pub use pool::{ConnFactory, ConnectionPool, PooledConnection};
pub use script::{Script, ScriptCall};

pub use pipekv_resp::Reply;
