//! # Action Protocol Layer
//!
//! Purpose: Turn heterogeneous call shapes (plain commands, flattened
//! variadic commands, batches, raw connection callbacks) into one uniform
//! serialize/transmit/deserialize contract over a [`Connection`].
//!
//! ## Design Principles
//! 1. **Closed Variant Set**: A flat family of action types behind the
//!    `Action`/`Request` traits, no inheritance.
//! 2. **Header Before Body**: Element counts are computed up front by a pure
//!    arity function so the array header is always exact.
//! 3. **Receivers Are Out-Slots**: Decoded replies land in caller-owned
//!    `Reply` slots; an absent slot means validate-and-discard.
//! 4. **One Burst Per Batch**: Batches write every request before reading
//!    any reply, collapsing N round-trips into one.

use std::cell::RefCell;
use std::fmt;
use std::io::{Cursor, Read, Write};

use pipekv_resp as resp;
use pipekv_resp::{Reply, WireError};

use crate::conn::Connection;
use crate::error::{ClientError, ClientResult};

/// Commands whose semantics do not target a routable key: administrative,
/// scripting-meta, transaction-meta, and scan-style commands.
///
/// Sorted, so membership is a binary search over immutable data.
const NO_KEY_COMMANDS: &[&str] = &[
    "ASKING",
    "AUTH",
    "BGREWRITEAOF",
    "BGSAVE",
    "CLIENT",
    "CLUSTER",
    "COMMAND",
    "CONFIG",
    "DBSIZE",
    "DEBUG",
    "DISCARD",
    "ECHO",
    "EVAL",
    "EVALSHA",
    "EXEC",
    "FLUSHALL",
    "FLUSHDB",
    "INFO",
    "KEYS",
    "LASTSAVE",
    "MIGRATE",
    "MONITOR",
    "MULTI",
    "OBJECT",
    "PING",
    "QUIT",
    "RANDOMKEY",
    "READONLY",
    "READWRITE",
    "ROLE",
    "SAVE",
    "SCAN",
    "SCRIPT",
    "SELECT",
    "SENTINEL",
    "SHUTDOWN",
    "SLAVEOF",
    "SLOWLOG",
    "SWAPDB",
    "SYNC",
    "TIME",
    "UNWATCH",
    "WAIT",
    "WATCH",
];

fn is_no_key_command(name: &str) -> bool {
    NO_KEY_COMMANDS.binary_search(&name).is_ok()
}

/// A unit of work performed against one leased connection.
pub trait Action {
    /// Keys the action will operate on; empty when none are routable.
    fn keys(&self) -> Vec<String>;

    /// Performs the action using the given connection.
    fn run(&mut self, conn: &mut Connection) -> ClientResult<()>;
}

/// An action whose request and reply can be driven separately, so a
/// [`Batch`] can write every member before reading any reply.
pub trait Request: Action + fmt::Display {
    /// Writes the request frames for this command.
    fn write_request(&self, w: &mut dyn Write) -> Result<(), WireError>;

    /// Reads one reply from the connection into this command's receiver.
    fn read_reply(&mut self, conn: &mut Connection) -> ClientResult<()>;
}

/// Renders the exact frames a request would put on the wire as a quoted
/// token list, by serializing into scratch and decoding back. Diagnostics
/// only; never on the hot path.
pub(crate) fn request_tokens(req: &dyn Request) -> String {
    let mut buf = Vec::new();
    if let Err(err) = req.write_request(&mut buf) {
        return format!("<error rendering request: {err}>");
    }
    let mut reader = Cursor::new(buf);
    let mut line = Vec::new();
    match resp::read_reply(&mut reader, &mut line) {
        Ok(reply) => {
            let mut tokens = Vec::new();
            reply.flatten_into(&mut tokens);
            let quoted: Vec<String> = tokens.iter().map(|t| format!("{t:?}")).collect();
            format!("[{}]", quoted.join(" "))
        }
        Err(err) => format!("<error rendering request: {err}>"),
    }
}

fn deliver(rcv: &mut Option<&mut Reply>, conn: &mut Connection) -> ClientResult<()> {
    let reply = conn.read_reply()?;
    if let Some(slot) = rcv.as_deref_mut() {
        *slot = reply;
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////

/// A single command with pre-stringified arguments.
///
/// ```no_run
/// use pipekv_client::{Command, Connection, ConnectionConfig, Reply};
///
/// # fn main() -> pipekv_client::ClientResult<()> {
/// let mut conn = Connection::connect(&ConnectionConfig::default())?;
/// conn.run(&mut Command::new("SET").arg("foo").arg("bar"))?;
///
/// let mut value = Reply::default();
/// conn.run(&mut Command::with_reply(&mut value, "GET").arg("foo"))?;
/// # Ok(())
/// # }
/// ```
pub struct Command<'a> {
    name: String,
    args: Vec<String>,
    rcv: Option<&'a mut Reply>,
}

impl Command<'static> {
    /// Creates a command whose reply is validated and discarded.
    pub fn new(name: impl Into<String>) -> Command<'static> {
        Command {
            name: name.into(),
            args: Vec::new(),
            rcv: None,
        }
    }
}

impl<'a> Command<'a> {
    /// Creates a command whose reply is stored into `rcv`.
    pub fn with_reply(rcv: &'a mut Reply, name: impl Into<String>) -> Command<'a> {
        Command {
            name: name.into(),
            args: Vec::new(),
            rcv: Some(rcv),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument from an iterator.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Action for Command<'_> {
    fn keys(&self) -> Vec<String> {
        let name = self.name.to_ascii_uppercase();
        if name == "BITOP" && self.args.len() > 1 {
            // The first BITOP argument is a destination, not a source key.
            return self.args[1..].to_vec();
        }
        if is_no_key_command(&name) || self.args.is_empty() {
            return Vec::new();
        }
        vec![self.args[0].clone()]
    }

    fn run(&mut self, conn: &mut Connection) -> ClientResult<()> {
        conn.send(&*self)?;
        Request::read_reply(self, conn)
    }
}

impl Request for Command<'_> {
    fn write_request(&self, w: &mut dyn Write) -> Result<(), WireError> {
        resp::write_array_header(w, 1 + self.args.len())?;
        resp::write_bulk_string(w, &self.name)?;
        for arg in &self.args {
            resp::write_bulk_string(w, arg)?;
        }
        Ok(())
    }

    fn read_reply(&mut self, conn: &mut Connection) -> ClientResult<()> {
        deliver(&mut self.rcv, conn)
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&request_tokens(self))
    }
}

////////////////////////////////////////////////////////////////////////////////

/// One argument of a [`FlatCommand`], flattened to bulk strings at
/// serialization time.
pub enum Arg {
    /// A single string element.
    Str(String),
    /// A single integer element.
    Int(i64),
    /// A single float element.
    Float(f64),
    /// A single binary element.
    Bytes(Vec<u8>),
    /// An ordered container; contributes each child's elements in order.
    List(Vec<Arg>),
    /// A keyed container; contributes alternating key/value elements.
    Map(Vec<(Arg, Arg)>),
    /// A byte stream of known length, written through without buffering.
    Stream(StreamArg),
}

/// Length-prefixed byte stream argument. Single use: the reader is consumed
/// the first time it is serialized.
pub struct StreamArg {
    len: u64,
    reader: RefCell<Option<Box<dyn Read + Send>>>,
}

impl fmt::Debug for StreamArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamArg").field("len", &self.len).finish()
    }
}

impl Arg {
    /// Wraps a reader of exactly `len` bytes as a stream argument.
    pub fn stream(len: u64, reader: impl Read + Send + 'static) -> Arg {
        Arg::Stream(StreamArg {
            len,
            reader: RefCell::new(Some(Box::new(reader))),
        })
    }

    /// Number of wire elements this argument flattens to.
    ///
    /// Pure; must agree exactly with what [`Arg::write_to`] emits, since the
    /// array header is declared before any argument is written.
    pub fn num_elems(&self) -> usize {
        match self {
            Arg::Str(_) | Arg::Int(_) | Arg::Float(_) | Arg::Bytes(_) | Arg::Stream(_) => 1,
            Arg::List(items) => items.iter().map(Arg::num_elems).sum(),
            Arg::Map(pairs) => pairs.iter().map(|(k, v)| k.num_elems() + v.num_elems()).sum(),
        }
    }

    fn write_to(&self, w: &mut dyn Write) -> Result<(), WireError> {
        match self {
            Arg::Str(s) => resp::write_bulk_string(w, s),
            Arg::Int(value) => resp::write_bulk_int(w, *value),
            Arg::Float(value) => resp::write_bulk_string(w, &value.to_string()),
            Arg::Bytes(data) => resp::write_bulk_bytes(w, data),
            Arg::List(items) => {
                for item in items {
                    item.write_to(w)?;
                }
                Ok(())
            }
            Arg::Map(pairs) => {
                for (key, value) in pairs {
                    key.write_to(w)?;
                    value.write_to(w)?;
                }
                Ok(())
            }
            Arg::Stream(stream) => {
                let mut src = stream
                    .reader
                    .borrow_mut()
                    .take()
                    .ok_or(WireError::Frame("stream argument already consumed"))?;
                resp::write_bulk_stream(w, stream.len, &mut *src)
            }
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Arg::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Arg::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Arg::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Arg::List(items) => f.debug_tuple("List").field(items).finish(),
            Arg::Map(pairs) => f.debug_tuple("Map").field(pairs).finish(),
            Arg::Stream(s) => s.fmt(f),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(value)
    }
}

impl From<Vec<Arg>> for Arg {
    fn from(value: Vec<Arg>) -> Self {
        Arg::List(value)
    }
}

/// A command whose designated key is always the second wire element and
/// whose remaining arguments are flattened from arbitrary [`Arg`] shapes.
///
/// Must not be used for commands whose first parameter is not a key; use
/// [`Command`] for those.
///
/// ```no_run
/// use pipekv_client::{Arg, Connection, ConnectionConfig, FlatCommand};
///
/// # fn main() -> pipekv_client::ClientResult<()> {
/// let mut conn = Connection::connect(&ConnectionConfig::default())?;
///
/// // performs "SADD" "fooSet" "1" "2" "3"
/// let members = vec![Arg::from(1), Arg::from(2), Arg::from(3)];
/// conn.run(&mut FlatCommand::new("SADD", "fooSet").arg(members))?;
/// # Ok(())
/// # }
/// ```
pub struct FlatCommand<'a> {
    name: String,
    key: String,
    args: Vec<Arg>,
    rcv: Option<&'a mut Reply>,
}

impl FlatCommand<'static> {
    /// Creates a flattened command whose reply is validated and discarded.
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> FlatCommand<'static> {
        FlatCommand {
            name: name.into(),
            key: key.into(),
            args: Vec::new(),
            rcv: None,
        }
    }
}

impl<'a> FlatCommand<'a> {
    /// Creates a flattened command whose reply is stored into `rcv`.
    pub fn with_reply(
        rcv: &'a mut Reply,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> FlatCommand<'a> {
        FlatCommand {
            name: name.into(),
            key: key.into(),
            args: Vec::new(),
            rcv: Some(rcv),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument from an iterator.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Action for FlatCommand<'_> {
    fn keys(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    fn run(&mut self, conn: &mut Connection) -> ClientResult<()> {
        conn.send(&*self)?;
        Request::read_reply(self, conn)
    }
}

impl Request for FlatCommand<'_> {
    fn write_request(&self, w: &mut dyn Write) -> Result<(), WireError> {
        let flattened: usize = self.args.iter().map(Arg::num_elems).sum();
        resp::write_array_header(w, 2 + flattened)?;
        resp::write_bulk_string(w, &self.name)?;
        resp::write_bulk_string(w, &self.key)?;
        for arg in &self.args {
            arg.write_to(w)?;
        }
        Ok(())
    }

    fn read_reply(&mut self, conn: &mut Connection) -> ClientResult<()> {
        deliver(&mut self.rcv, conn)
    }
}

impl fmt::Display for FlatCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&request_tokens(self))
    }
}

////////////////////////////////////////////////////////////////////////////////

/// An ordered batch of commands run as one write burst followed by one read
/// burst, collapsing the network delay into a single round-trip.
///
/// The Nth reply always answers the Nth request.
pub struct Batch<'a> {
    cmds: Vec<Box<dyn Request + 'a>>,
}

impl<'a> Batch<'a> {
    /// Creates an empty batch.
    pub fn new() -> Batch<'a> {
        Batch { cmds: Vec::new() }
    }

    /// Appends a command; batch order is write order and read order.
    pub fn add(mut self, cmd: impl Request + 'a) -> Self {
        self.cmds.push(Box::new(cmd));
        self
    }

    /// Number of commands in the batch.
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    /// True when the batch holds no commands.
    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }
}

impl Default for Batch<'_> {
    fn default() -> Self {
        Batch::new()
    }
}

impl Action for Batch<'_> {
    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for cmd in &self.cmds {
            for key in cmd.keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    fn run(&mut self, conn: &mut Connection) -> ClientResult<()> {
        for cmd in &self.cmds {
            conn.write_request(cmd.as_ref())?;
        }
        conn.flush()?;

        // A server error reply still leaves the later replies on the stream.
        // Drain every slot so the connection stays aligned for reuse, then
        // report the first failure. Transport faults abort immediately; the
        // stream state is unknown and the connection is already marked broken.
        let mut first_err: Option<ClientError> = None;
        for cmd in &mut self.cmds {
            if let Err(err) = cmd.read_reply(conn) {
                match err {
                    ClientError::Io(_) | ClientError::Wire(_) => return Err(err),
                    _ => {
                        if first_err.is_none() {
                            first_err = Some(err);
                        }
                    }
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Batch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, cmd) in self.cmds.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            fmt::Display::fmt(cmd, f)?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Runs a caller-supplied callback against one leased connection, so several
/// independently-framed actions share a single connection.
///
/// This provides connection affinity only, not atomicity. Wrap the inner
/// commands in `MULTI`/`EXEC` when the sequence must be transactional.
pub struct ConnCallback<'a> {
    key: String,
    callback: Box<dyn FnMut(&mut Connection) -> ClientResult<()> + 'a>,
}

impl<'a> ConnCallback<'a> {
    /// Creates a callback action. `key` should be a key one of the inner
    /// actions operates on, or empty when none do.
    pub fn new(
        key: impl Into<String>,
        callback: impl FnMut(&mut Connection) -> ClientResult<()> + 'a,
    ) -> ConnCallback<'a> {
        ConnCallback {
            key: key.into(),
            callback: Box::new(callback),
        }
    }
}

impl Action for ConnCallback<'_> {
    fn keys(&self) -> Vec<String> {
        if self.key.is_empty() {
            Vec::new()
        } else {
            vec![self.key.clone()]
        }
    }

    fn run(&mut self, conn: &mut Connection) -> ClientResult<()> {
        (self.callback)(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(req: &dyn Request) -> Vec<u8> {
        let mut buf = Vec::new();
        req.write_request(&mut buf).expect("encode");
        buf
    }

    #[test]
    fn no_key_table_is_sorted() {
        let mut sorted = NO_KEY_COMMANDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, NO_KEY_COMMANDS);
    }

    #[test]
    fn keys_is_first_argument() {
        let cmd = Command::new("set").arg("foo").arg("bar");
        assert_eq!(cmd.keys(), vec!["foo"]);
    }

    #[test]
    fn keys_is_empty_for_no_key_commands() {
        assert!(Command::new("PING").keys().is_empty());
        assert!(Command::new("scan").arg("0").keys().is_empty());
        assert!(Command::new("MULTI").keys().is_empty());
    }

    #[test]
    fn keys_is_empty_without_arguments() {
        assert!(Command::new("GET").keys().is_empty());
    }

    #[test]
    fn bitop_keys_skip_the_destination() {
        let cmd = Command::new("BITOP").args(["dst", "src1", "src2"]);
        assert_eq!(cmd.keys(), vec!["src1", "src2"]);

        let single = Command::new("BITOP").arg("dst");
        assert_eq!(single.keys(), vec!["dst"]);
    }

    #[test]
    fn command_encodes_array_of_bulk_strings() {
        let cmd = Command::new("SET").arg("foo").arg("bar");
        assert_eq!(encode(&cmd), b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn flat_list_matches_spelled_out_command() {
        let members = vec![Arg::from(1), Arg::from(2), Arg::from(3)];
        let flat = FlatCommand::new("SADD", "fooSet").arg(members);
        let spelled = Command::new("SADD").args(["fooSet", "1", "2", "3"]);
        assert_eq!(encode(&flat), encode(&spelled));
    }

    #[test]
    fn flat_map_alternates_keys_and_values() {
        let fields = vec![
            (Arg::from("a"), Arg::from(1)),
            (Arg::from("b"), Arg::from(2)),
        ];
        let flat = FlatCommand::new("HMSET", "fooHash").arg(Arg::Map(fields));
        let spelled = Command::new("HMSET").args(["fooHash", "a", "1", "b", "2"]);
        assert_eq!(encode(&flat), encode(&spelled));
    }

    #[test]
    fn arity_recurses_through_containers() {
        let arg = Arg::List(vec![
            Arg::from("x"),
            Arg::Map(vec![(Arg::from("k"), Arg::from(1))]),
            Arg::List(vec![]),
        ]);
        assert_eq!(arg.num_elems(), 3);
        assert_eq!(Arg::stream(9, std::io::empty()).num_elems(), 1);
    }

    #[test]
    fn stream_argument_writes_once_then_errors() {
        let flat = FlatCommand::new("SET", "fooReq")
            .arg(Arg::stream(5, Cursor::new(b"hello".to_vec())));
        assert_eq!(
            encode(&flat),
            b"*3\r\n$3\r\nSET\r\n$6\r\nfooReq\r\n$5\r\nhello\r\n"
        );

        let mut buf = Vec::new();
        let err = flat.write_request(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::Frame(_)));
    }

    #[test]
    fn batch_keys_deduplicate_in_first_seen_order() {
        let batch = Batch::new()
            .add(Command::new("GET").arg("foo"))
            .add(Command::new("SET").arg("bar").arg("1"))
            .add(Command::new("INCR").arg("foo"));
        assert_eq!(batch.keys(), vec!["foo", "bar"]);
    }

    #[test]
    fn callback_key_is_optional() {
        assert_eq!(
            ConnCallback::new("someKey", |_| Ok(())).keys(),
            vec!["someKey"]
        );
        assert!(ConnCallback::new("", |_| Ok(())).keys().is_empty());
    }

    #[test]
    fn display_renders_quoted_tokens() {
        let cmd = Command::new("SET").arg("foo").arg("with space");
        assert_eq!(cmd.to_string(), r#"["SET" "foo" "with space"]"#);
    }

    #[test]
    fn batch_display_joins_members() {
        let batch = Batch::new()
            .add(Command::new("GET").arg("a"))
            .add(Command::new("DEL").arg("b"));
        assert_eq!(batch.to_string(), r#"["GET" "a"] ["DEL" "b"]"#);
    }
}
