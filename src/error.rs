//! Typed errors for each subsystem boundary, converted to RESP error replies
//! at the dispatcher (see `server::handle_connection`).

use thiserror::Error;

/// Errors raised while parsing or serializing a RESP frame (C1).
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not enough bytes buffered yet; the caller should read more and retry.
    #[error("incomplete frame")]
    Incomplete,

    /// The header, length field, or terminator was malformed.
    #[error("protocol error: {0}")]
    Malformed(String),

    /// A declared bulk-string size, running command size, or argument count
    /// exceeded a configured limit. Rejected before any allocation.
    #[error("protocol limit exceeded: {0}")]
    ProtocolLimit(String),
}

/// Errors surfaced by the keyspace (C2/C3).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("maximum memory reached")]
    OutOfMemory,
}

/// Errors surfaced by the AOF subsystem (C4).
#[derive(Debug, Error)]
pub enum AofError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed command at byte offset {offset}")]
    Malformed { offset: u64 },
}

/// Errors surfaced by the RDB subsystem (C5).
#[derive(Debug, Error)]
pub enum RdbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt snapshot: checksum mismatch")]
    CorruptSnapshot,
    #[error("corrupt snapshot: {0}")]
    Malformed(String),
}

/// Errors a command handler can raise; mapped to a RESP error frame by the
/// dispatcher. Every variant here corresponds to one of the error kinds
/// enumerated in spec §7.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("ERR invalid command")]
    UnknownCommand,
    #[error("ERR invalid args for '{0}'")]
    Arity(String),
    #[error("ERR operation not permitted")]
    AuthRequired,
    #[error("ERR invalid password")]
    BadPassword,
    #[error("ERR maximum memory reached")]
    OutOfMemory,
    #[error("ERR background save already in progress")]
    BgsaveBusy,
    #[error("ERR AOF rewrite already in progress")]
    BgrewriteaofBusy,
    #[error("ERR {0}")]
    Io(String),
}

impl From<DbError> for CommandError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::OutOfMemory => CommandError::OutOfMemory,
        }
    }
}

impl CommandError {
    /// Render as the body of a RESP error frame (without the leading `-`).
    pub fn as_resp_message(&self) -> String {
        self.to_string()
    }
}
