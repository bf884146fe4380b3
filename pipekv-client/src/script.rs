//! # Server-Side Scripts
//!
//! Purpose: Invoke cached server-side scripts by content digest, falling
//! back to shipping the full source exactly once when the server has not
//! cached the script yet.

use std::fmt;
use std::io::Write;

use sha1::{Digest, Sha1};

use pipekv_resp as resp;
use pipekv_resp::{Reply, WireError};

use crate::action::{Action, Request};
use crate::conn::Connection;
use crate::error::{ClientError, ClientResult};

/// Error-reply prefix the server uses when a digest is not in its script
/// cache.
const NOT_CACHED_PREFIX: &str = "NOSCRIPT";

/// An immutable script definition: source text, its hex SHA-1 digest, and
/// how many leading call arguments are keys.
///
/// The digest is computed once at construction and never recomputed, so a
/// definition can be built at startup and shared freely.
///
/// ```
/// use pipekv_client::Script;
///
/// let get_set = Script::new(1, r#"
///     local prev = server.call('GET', KEYS[1])
///     server.call('SET', KEYS[1], ARGV[1])
///     return prev
/// "#);
/// let call = get_set.call(["myKey", "myVal"]).expect("enough keys");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    source: String,
    digest: String,
    num_keys: usize,
}

impl Script {
    /// Creates a definition for a script whose first `num_keys` call
    /// arguments are keys.
    pub fn new(num_keys: usize, source: impl Into<String>) -> Script {
        let source = source.into();
        let digest = hex::encode(Sha1::digest(source.as_bytes()));
        Script {
            source,
            digest,
            num_keys,
        }
    }

    /// Hex-encoded SHA-1 digest of the source text.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Number of leading call arguments that are keys.
    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    /// Builds a call whose reply is validated and discarded.
    ///
    /// Fails when fewer arguments than `num_keys` are supplied.
    pub fn call<I, S>(&self, args: I) -> ClientResult<ScriptCall<'static>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.build_call(None, args)
    }

    /// Builds a call whose reply is stored into `rcv`.
    pub fn call_with_reply<'a, I, S>(
        &self,
        rcv: &'a mut Reply,
        args: I,
    ) -> ClientResult<ScriptCall<'a>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.build_call(Some(rcv), args)
    }

    fn build_call<'a, I, S>(
        &self,
        rcv: Option<&'a mut Reply>,
        args: I,
    ) -> ClientResult<ScriptCall<'a>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.len() < self.num_keys {
            return Err(ClientError::InvalidArgument(format!(
                "script call needs at least {} key arguments, got {}",
                self.num_keys,
                args.len()
            )));
        }
        Ok(ScriptCall {
            script: self.clone(),
            args,
            rcv,
            send_source: false,
        })
    }
}

/// One invocation of a [`Script`].
///
/// A single run may transmit two requests: the digest-reference form first,
/// then the full source as a fallback when the server reports the digest is
/// not cached. The retry mode is transient per-run state, so one call value
/// must not be shared across threads; the [`Script`] itself can be.
#[derive(Debug)]
pub struct ScriptCall<'a> {
    script: Script,
    args: Vec<String>,
    rcv: Option<&'a mut Reply>,
    send_source: bool,
}

impl ScriptCall<'_> {
    fn attempt(&mut self, conn: &mut Connection) -> ClientResult<()> {
        conn.send(&*self)?;
        Request::read_reply(self, conn)
    }
}

impl Action for ScriptCall<'_> {
    fn keys(&self) -> Vec<String> {
        self.args[..self.script.num_keys].to_vec()
    }

    fn run(&mut self, conn: &mut Connection) -> ClientResult<()> {
        self.send_source = false;
        match self.attempt(conn) {
            Err(ClientError::Server(text)) if text.starts_with(NOT_CACHED_PREFIX) => {
                // Server has not cached this digest; replay once with the
                // full source on the same connection.
                self.send_source = true;
                self.attempt(conn)
            }
            result => result,
        }
    }
}

impl Request for ScriptCall<'_> {
    fn write_request(&self, w: &mut dyn Write) -> Result<(), WireError> {
        resp::write_array_header(w, 3 + self.args.len())?;
        if self.send_source {
            resp::write_bulk_string(w, "EVAL")?;
            resp::write_bulk_string(w, &self.script.source)?;
        } else {
            resp::write_bulk_string(w, "EVALSHA")?;
            resp::write_bulk_string(w, &self.script.digest)?;
        }
        resp::write_bulk_int(w, self.script.num_keys as i64)?;
        for arg in &self.args {
            resp::write_bulk_string(w, arg)?;
        }
        Ok(())
    }

    fn read_reply(&mut self, conn: &mut Connection) -> ClientResult<()> {
        let reply = conn.read_reply()?;
        if let Some(slot) = self.rcv.as_deref_mut() {
            *slot = reply;
        }
        Ok(())
    }
}

impl fmt::Display for ScriptCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::action::request_tokens(self))
    }
}
