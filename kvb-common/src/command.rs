//! # Command Model
//!
//! Purpose: Describe what a REST request asks the store to do and what the
//! store answered, without committing to either wire format.
//!
//! ## Design Principles
//! 1. **Immutable Commands**: A `Command` never changes after parsing.
//! 2. **Binary-Safe Arguments**: Arguments are raw bytes (`Bytes`), so values
//!    round-trip byte-identically.
//! 3. **Positional Results**: A batch of N commands always yields N results.
//! 4. **Closed Families**: Command names resolve to a fixed set of families.
//!    Unknown names fall into `Generic` and are forwarded; only commands that
//!    would tie up or alter a pooled session are `Unsupported`.

use std::fmt;

use bytes::Bytes;

// ============================================================================
// COMMANDS
// ============================================================================

/// A single store command: name followed by arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    /// Creates a command from a name and its arguments.
    pub fn new(name: impl Into<String>, args: Vec<Bytes>) -> Self {
        Command {
            name: name.into(),
            args,
        }
    }

    /// Builds a command from string tokens, the first being the name.
    ///
    /// Returns `None` when `tokens` is empty.
    pub fn from_tokens<I, T>(tokens: I) -> Option<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        let mut iter = tokens.into_iter().map(Into::into);
        let name = iter.next()?;
        let name = String::from_utf8_lossy(&name).into_owned();
        Some(Command::new(name, iter.collect()))
    }

    /// Command name as supplied by the client.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command arguments in order.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Resolves the family this command belongs to.
    pub fn family(&self) -> CommandFamily {
        CommandFamily::classify(&self.name)
    }

    /// Returns the full token list (name first) as borrowed slices.
    pub fn parts(&self) -> Vec<&[u8]> {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.name.as_bytes());
        parts.extend(self.args.iter().map(|arg| arg.as_ref()));
        parts
    }
}

/// How a batch of commands is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Exactly one command.
    Single,
    /// Independent commands; failures stay at their own position.
    Pipeline,
    /// All-or-nothing group through the store's MULTI/EXEC.
    Transaction,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecMode::Single => "single",
            ExecMode::Pipeline => "pipeline",
            ExecMode::Transaction => "transaction",
        };
        f.write_str(name)
    }
}

/// Ordered commands tagged with an execution mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    mode: ExecMode,
    commands: Vec<Command>,
}

impl CommandBatch {
    pub fn new(mode: ExecMode, commands: Vec<Command>) -> Self {
        CommandBatch { mode, commands }
    }

    pub fn single(command: Command) -> Self {
        CommandBatch::new(ExecMode::Single, vec![command])
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns the first command the bridge refuses to forward, if any.
    pub fn first_unsupported(&self) -> Option<&Command> {
        self.commands
            .iter()
            .find(|cmd| cmd.family() == CommandFamily::Unsupported)
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// A typed value returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Status reply such as `OK` or `PONG`.
    Status(String),
    /// Binary-safe string.
    Bytes(Bytes),
    Integer(i64),
    /// Nested reply; elements may themselves be nil or errors.
    Array(Vec<CommandResult>),
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Value(Value),
    /// Absent value (null bulk or null array).
    Nil,
    /// Store error message, verbatim.
    Error(String),
}

impl CommandResult {
    pub fn ok() -> Self {
        CommandResult::Value(Value::Status("OK".to_string()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        CommandResult::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CommandResult::Error(_))
    }

    /// Error result for a command the bridge will not forward.
    pub fn unsupported(command: &Command) -> Self {
        CommandResult::Error(format!("ERR unsupported command '{}'", command.name()))
    }
}

// ============================================================================
// COMMAND FAMILIES
// ============================================================================

/// Operation family a command name belongs to.
///
/// `Unsupported` is reserved for commands that would leave a pooled session
/// in a connection-specific state (MULTI, SELECT, SUBSCRIBE, ...) or block it
/// (BLPOP, ...). Names the bridge does not know resolve to `Generic` and are
/// forwarded, so the store reports its own error for unknown commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandFamily {
    Strings,
    Keys,
    Hashes,
    Lists,
    Sets,
    SortedSets,
    HyperLogLog,
    Bitmaps,
    Streams,
    Geo,
    Scripting,
    PubSub,
    Server,
    Generic,
    Unsupported,
}

impl CommandFamily {
    /// Classifies a command name, case-insensitively.
    pub fn classify(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            // Session state and blocking.
            "MULTI" | "EXEC" | "DISCARD" | "WATCH" | "UNWATCH" | "SELECT" | "SWAPDB" | "AUTH"
            | "HELLO" | "RESET" | "QUIT" | "CLIENT" | "READONLY" | "READWRITE" | "MONITOR"
            | "SYNC" | "PSYNC" | "REPLICAOF" | "SLAVEOF" | "SHUTDOWN" | "WAIT" | "WAITAOF"
            | "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE" | "SSUBSCRIBE"
            | "SUNSUBSCRIBE" | "BLPOP" | "BRPOP" | "BRPOPLPUSH" | "BLMOVE" | "BLMPOP"
            | "BZPOPMIN" | "BZPOPMAX" | "BZMPOP" => Self::Unsupported,

            "GET" | "SET" | "SETNX" | "SETEX" | "PSETEX" | "GETSET" | "GETDEL" | "GETEX"
            | "MGET" | "MSET" | "MSETNX" | "INCR" | "INCRBY" | "INCRBYFLOAT" | "DECR"
            | "DECRBY" | "APPEND" | "STRLEN" | "GETRANGE" | "SETRANGE" | "SUBSTR" | "LCS" => {
                Self::Strings
            }

            "DEL" | "UNLINK" | "EXISTS" | "EXPIRE" | "EXPIREAT" | "PEXPIRE" | "PEXPIREAT"
            | "EXPIRETIME" | "PEXPIRETIME" | "TTL" | "PTTL" | "PERSIST" | "TYPE" | "KEYS"
            | "SCAN" | "RENAME" | "RENAMENX" | "TOUCH" | "RANDOMKEY" | "COPY" | "SORT"
            | "SORT_RO" | "OBJECT" | "DUMP" | "RESTORE" | "MOVE" => Self::Keys,

            "HSET" | "HSETNX" | "HGET" | "HMSET" | "HMGET" | "HGETALL" | "HDEL" | "HEXISTS"
            | "HINCRBY" | "HINCRBYFLOAT" | "HKEYS" | "HVALS" | "HLEN" | "HSTRLEN" | "HSCAN"
            | "HRANDFIELD" => Self::Hashes,

            "LPUSH" | "RPUSH" | "LPUSHX" | "RPUSHX" | "LPOP" | "RPOP" | "LRANGE" | "LLEN"
            | "LINDEX" | "LSET" | "LREM" | "LTRIM" | "LINSERT" | "LPOS" | "LMOVE"
            | "RPOPLPUSH" | "LMPOP" => Self::Lists,

            "SADD" | "SREM" | "SMEMBERS" | "SISMEMBER" | "SMISMEMBER" | "SCARD" | "SPOP"
            | "SRANDMEMBER" | "SINTER" | "SINTERCARD" | "SINTERSTORE" | "SUNION"
            | "SUNIONSTORE" | "SDIFF" | "SDIFFSTORE" | "SMOVE" | "SSCAN" => Self::Sets,

            "ZADD" | "ZREM" | "ZRANGE" | "ZREVRANGE" | "ZRANGEBYSCORE" | "ZREVRANGEBYSCORE"
            | "ZRANGEBYLEX" | "ZREVRANGEBYLEX" | "ZRANGESTORE" | "ZSCORE" | "ZMSCORE"
            | "ZCARD" | "ZCOUNT" | "ZLEXCOUNT" | "ZINCRBY" | "ZRANK" | "ZREVRANK" | "ZPOPMIN"
            | "ZPOPMAX" | "ZMPOP" | "ZREMRANGEBYRANK" | "ZREMRANGEBYSCORE" | "ZREMRANGEBYLEX"
            | "ZSCAN" | "ZUNION" | "ZINTER" | "ZDIFF" | "ZINTERCARD" | "ZUNIONSTORE"
            | "ZINTERSTORE" | "ZDIFFSTORE" | "ZRANDMEMBER" => Self::SortedSets,

            "PFADD" | "PFCOUNT" | "PFMERGE" => Self::HyperLogLog,

            "SETBIT" | "GETBIT" | "BITCOUNT" | "BITOP" | "BITPOS" | "BITFIELD"
            | "BITFIELD_RO" => Self::Bitmaps,

            "XADD" | "XRANGE" | "XREVRANGE" | "XLEN" | "XDEL" | "XTRIM" | "XREAD"
            | "XREADGROUP" | "XGROUP" | "XACK" | "XPENDING" | "XCLAIM" | "XAUTOCLAIM"
            | "XINFO" | "XSETID" => Self::Streams,

            "GEOADD" | "GEODIST" | "GEOHASH" | "GEOPOS" | "GEORADIUS" | "GEORADIUS_RO"
            | "GEORADIUSBYMEMBER" | "GEORADIUSBYMEMBER_RO" | "GEOSEARCH" | "GEOSEARCHSTORE" => {
                Self::Geo
            }

            "EVAL" | "EVALSHA" | "EVAL_RO" | "EVALSHA_RO" | "SCRIPT" | "FCALL" | "FCALL_RO"
            | "FUNCTION" => Self::Scripting,

            "PUBLISH" | "SPUBLISH" | "PUBSUB" => Self::PubSub,

            "PING" | "ECHO" | "DBSIZE" | "FLUSHDB" | "FLUSHALL" | "TIME" | "INFO" | "DEBUG"
            | "CONFIG" | "COMMAND" | "MEMORY" | "LASTSAVE" => Self::Server,

            _ => Self::Generic,
        }
    }

    /// Human-readable family name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Strings => "strings",
            Self::Keys => "keys",
            Self::Hashes => "hashes",
            Self::Lists => "lists",
            Self::Sets => "sets",
            Self::SortedSets => "sorted_sets",
            Self::HyperLogLog => "hyperloglog",
            Self::Bitmaps => "bitmaps",
            Self::Streams => "streams",
            Self::Geo => "geo",
            Self::Scripting => "scripting",
            Self::PubSub => "pubsub",
            Self::Server => "server",
            Self::Generic => "generic",
            Self::Unsupported => "unsupported",
        }
    }

    /// Check if commands of this family are forwarded to the store.
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

impl fmt::Display for CommandFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
