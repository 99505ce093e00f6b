//! Wire protocol: constants, status codes, and framing.
//!
//! Every message travels as one frame on the stream socket:
//!
//! ```text
//! request:  [N][identifier][arg words ...]            N = 1 + args
//! response: [N][identifier][status][payload ...]      N = 2 + payload
//! ```
//!
//! All words, including the count `N`, are 32-bit unsigned integers in
//! network byte order (big-endian). The payload of a successful response is
//! the return value encoded per the function's return tag; error responses
//! carry at most one detail word.

use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Maximum number of simultaneously connected clients per server.
pub const MAX_CLIENTS: usize = 64;

/// Maximum length of a link name, in bytes.
pub const MAX_NAME_LEN: usize = 20;

/// Maximum argument or return payload of a single message, in words.
pub const MAX_PAYLOAD_WORDS: usize = 256;

/// Maximum number of functions a single server can export.
pub const MAX_EXPORTS: usize = 256;

/// Client call timeout and per-client server I/O timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Directory holding the server sockets.
pub const DEFAULT_BASE_DIR: &str = "/tmp/.minipc";

pub(crate) const MAX_REQUEST_WORDS: usize = 1 + MAX_PAYLOAD_WORDS;
pub(crate) const MAX_RESPONSE_WORDS: usize = 2 + MAX_PAYLOAD_WORDS;

/// Socket path for the server called `name` under `base_dir`.
pub fn socket_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join(name)
}

/// Response status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success = 0,
    UnknownFunction = 1,
    MalformedArguments = 2,
    HandlerError = 3,
}

impl Status {
    pub fn from_word(word: u32) -> Option<Self> {
        match word {
            0 => Some(Status::Success),
            1 => Some(Status::UnknownFunction),
            2 => Some(Status::MalformedArguments),
            3 => Some(Status::HandlerError),
            _ => None,
        }
    }
}

/// Why the server could not decode a request; the detail word of a
/// `MalformedArguments` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Truncated = 1,
    Oversized = 2,
    Mismatch = 3,
}

impl Fault {
    pub fn from_word(word: u32) -> Option<Self> {
        match word {
            1 => Some(Fault::Truncated),
            2 => Some(Fault::Oversized),
            3 => Some(Fault::Mismatch),
            _ => None,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Truncated => f.write_str("truncated message"),
            Fault::Oversized => f.write_str("oversized field"),
            Fault::Mismatch => f.write_str("encoding mismatch"),
        }
    }
}

/// A call request: function identifier plus encoded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u32,
    pub args: Vec<u32>,
}

impl Request {
    pub fn new(id: u32, args: Vec<u32>) -> Self {
        Self { id, args }
    }

    pub(crate) fn from_words(mut words: Vec<u32>) -> Option<Self> {
        if words.is_empty() {
            return None;
        }
        let args = words.split_off(1);
        Some(Self { id: words[0], args })
    }

    pub(crate) fn to_words(&self) -> Vec<u32> {
        let mut words = Vec::with_capacity(1 + self.args.len());
        words.push(self.id);
        words.extend_from_slice(&self.args);
        words
    }
}

/// A call response: identifier echoed from the request, status, and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: u32,
    pub status: Status,
    pub payload: Vec<u32>,
}

impl Response {
    pub fn success(id: u32, payload: Vec<u32>) -> Self {
        Self {
            id,
            status: Status::Success,
            payload,
        }
    }

    pub fn unknown_function(id: u32) -> Self {
        Self {
            id,
            status: Status::UnknownFunction,
            payload: Vec::new(),
        }
    }

    pub fn malformed(id: u32, fault: Fault) -> Self {
        Self {
            id,
            status: Status::MalformedArguments,
            payload: vec![fault as u32],
        }
    }

    pub fn handler_error(id: u32, code: i32) -> Self {
        Self {
            id,
            status: Status::HandlerError,
            payload: vec![code as u32],
        }
    }

    pub(crate) fn from_words(words: &[u32]) -> Result<Self, String> {
        let [id, status, payload @ ..] = words else {
            return Err(format!("response of {} word(s) lacks a header", words.len()));
        };
        let status =
            Status::from_word(*status).ok_or_else(|| format!("unknown status word {status}"))?;
        Ok(Self {
            id: *id,
            status,
            payload: payload.to_vec(),
        })
    }

    pub(crate) fn to_words(&self) -> Vec<u32> {
        let mut words = Vec::with_capacity(2 + self.payload.len());
        words.push(self.id);
        words.push(self.status as u32);
        words.extend_from_slice(&self.payload);
        words
    }
}

/// Write one frame, retrying short writes until it is complete.
pub(crate) fn write_frame<W: Write>(writer: &mut W, words: &[u32]) -> io::Result<()> {
    let mut buf = Vec::with_capacity((1 + words.len()) * 4);
    buf.write_u32::<BigEndian>(words.len() as u32)?;
    for &word in words {
        buf.write_u32::<BigEndian>(word)?;
    }
    writer.write_all(&buf)?;
    writer.flush()
}

/// Read one frame of at most `max_words` words.
///
/// A zero-length frame or one above `max_words` is reported as
/// [`io::ErrorKind::InvalidData`]: the stream cannot be resynchronized.
pub(crate) fn read_frame<R: Read>(reader: &mut R, max_words: usize) -> io::Result<Vec<u32>> {
    let len = reader.read_u32::<BigEndian>()? as usize;
    if len == 0 || len > max_words {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} words, expected 1..={max_words}"),
        ));
    }
    let mut words = vec![0u32; len];
    reader.read_u32_into::<BigEndian>(&mut words)?;
    Ok(words)
}

/// Whether an I/O error came from an elapsed socket timeout.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// A stream view that bounds a whole frame, however many `read` or `write`
/// calls it takes, by one deadline. Each call gets the time that is left.
pub(crate) struct DeadlineStream<'a> {
    stream: &'a UnixStream,
    deadline: Instant,
}

impl<'a> DeadlineStream<'a> {
    pub(crate) fn new(stream: &'a UnixStream, timeout: Duration) -> Self {
        Self {
            stream,
            deadline: Instant::now() + timeout,
        }
    }

    fn remaining(&self) -> io::Result<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "frame deadline elapsed"));
        }
        Ok(remaining)
    }
}

impl Read for DeadlineStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.set_read_timeout(Some(self.remaining()?))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

impl Write for DeadlineStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.set_write_timeout(Some(self.remaining()?))?;
        let mut stream = self.stream;
        stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
