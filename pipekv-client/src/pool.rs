//! # Connection Pool
//!
//! Purpose: Keep a bounded, lazily-filled stack of connections so request
//! latency is dominated by network round-trips, not connection setup.
//!
//! ## Design Principles
//! 1. **Bounded Stack**: A fixed set of slots, each empty or holding a live
//!    connection; acquisition blocks while none are available.
//! 2. **Lazy Dialing**: A slot's connection is created on the first
//!    acquisition that finds the slot empty, never up front.
//! 3. **Broken Means Discarded**: A connection released in a broken state
//!    reverts its slot to empty, so the next acquisition re-dials instead of
//!    reusing a poisoned stream.
//! 4. **Conserved Slots**: Available slots plus leased connections always
//!    equals capacity; a failed dial never consumes a slot.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

use crate::action::Action;
use crate::conn::{Connection, ConnectionConfig};
use crate::error::{ClientError, ClientResult};

/// Factory used to lazily dial pooled connections.
pub type ConnFactory = Box<dyn Fn() -> ClientResult<Connection> + Send + Sync>;

struct PoolState {
    /// Slot stack; the top `available` entries are acquirable, each either
    /// empty (`None`, dial on demand) or holding a live connection.
    slots: Vec<Option<Connection>>,
    available: usize,
}

struct PoolInner {
    factory: ConnFactory,
    capacity: usize,
    state: Mutex<PoolState>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Bounded blocking connection pool handle.
///
/// Cloning is cheap and every clone shares the same slots. Connections are
/// handed out stack-fashion; concurrent callers may race for the same slot.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool of `capacity` empty slots over the given factory.
    pub fn new<F>(capacity: usize, factory: F) -> ClientResult<ConnectionPool>
    where
        F: Fn() -> ClientResult<Connection> + Send + Sync + 'static,
    {
        if capacity == 0 {
            return Err(ClientError::InvalidArgument(
                "pool capacity must be positive".to_string(),
            ));
        }
        let state = PoolState {
            slots: (0..capacity).map(|_| None).collect(),
            available: capacity,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                factory: Box::new(factory),
                capacity,
                state: Mutex::new(state),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        })
    }

    /// Creates a pool whose factory dials the given configuration.
    pub fn connect(capacity: usize, config: ConnectionConfig) -> ClientResult<ConnectionPool> {
        ConnectionPool::new(capacity, move || Connection::connect(&config))
    }

    /// Capacity fixed at construction.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Takes a connection out of the pool, blocking while none are
    /// available and dialing lazily when the taken slot is empty.
    ///
    /// A factory failure is returned immediately and leaves the slot
    /// available for the next caller.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        let conn = self.inner.acquire()?;
        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            conn: Some(conn),
        })
    }

    /// Acquires a connection, performs the action, and releases the
    /// connection afterwards, broken or not.
    pub fn run(&self, action: &mut dyn Action) -> ClientResult<()> {
        let mut conn = self.acquire()?;
        action.run(&mut conn)
    }
}

impl PoolInner {
    fn acquire(&self) -> ClientResult<Connection> {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        while state.available == 0 {
            state = self.not_empty.wait(state).expect("pool mutex poisoned");
        }

        let top = state.available - 1;
        let conn = match state.slots[top].take() {
            Some(conn) => conn,
            None => {
                // Lazy dial under the lock: ownership of the top slot
                // requires it. On failure the slot stays empty and the
                // available count is untouched, so the attempt never held
                // a slot.
                debug!("dialing new pooled connection");
                (self.factory)()?
            }
        };

        state.available = top;
        self.not_full.notify_one();
        Ok(conn)
    }

    fn release(&self, conn: Option<Connection>) {
        let conn = match conn {
            Some(conn) if conn.is_broken() => {
                // Never reuse a broken connection; its slot reverts to
                // empty and the next acquisition re-dials.
                debug!("discarding broken pooled connection");
                None
            }
            other => other,
        };

        let mut state = self.state.lock().expect("pool mutex poisoned");
        while state.available == self.capacity {
            // Reachable only by a release without a matching acquire; such
            // a caller parks here rather than pushing past capacity.
            state = self.not_full.wait(state).expect("pool mutex poisoned");
        }

        let top = state.available;
        state.slots[top] = conn;
        state.available = top + 1;
        self.not_empty.notify_one();
    }
}

/// RAII lease over one pooled connection.
///
/// The connection is exclusively owned between acquire and release; drop
/// returns it to the pool, or discards it when it is broken.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.release(self.conn.take());
    }
}
