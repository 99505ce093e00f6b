//! The single error type returned by every public link operation.

use std::path::PathBuf;
use std::time::Duration;

use crate::link::Mode;
use crate::marshal::CodecError;
use crate::protocol::Fault;

/// Errors from link, export, marshalling, and call operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The handle was closed, or was never a valid link.
    #[error("invalid link handle")]
    InvalidHandle,

    #[error("operation requires a {expected:?} link")]
    WrongMode { expected: Mode },

    #[error("invalid link name {0:?}")]
    InvalidName(String),

    #[error("name is {len} bytes long, the maximum is {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("a server is already listening at {0}")]
    PathInUse(PathBuf),

    #[error("no server socket at {0}")]
    NoSuchServer(PathBuf),

    #[error("connection refused at {0}")]
    ConnectionRefused(PathBuf),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("unknown function {0:#010x}")]
    UnknownFunction(u32),

    #[error("function {0:#010x} is already exported")]
    DuplicateExport(u32),

    #[error("no export named {0:?}")]
    NotExported(String),

    /// The server could not decode the arguments of a call.
    #[error("server rejected arguments: {0}")]
    MalformedArguments(Fault),

    #[error("remote handler failed with code {code}")]
    HandlerFailed { code: i32 },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// A previous timeout or transport failure left the client link unusable.
    #[error("link is broken, reconnect required")]
    LinkBroken,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}
