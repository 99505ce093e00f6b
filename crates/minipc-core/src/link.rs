//! Links, the handle every client and server operation goes through.
//!
//! A [`Link`] owns its sockets and carries a validity tag. Every public
//! operation checks the tag before touching anything else, so a closed link
//! reports [`Error::InvalidHandle`] instead of acting on released state.

use std::fmt;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{
    AddressFamily, SockFlag, SockType, UnixAddr, connect, setsockopt, socket, sockopt,
};
use nix::sys::time::{TimeVal, TimeValLike};
use tracing::{debug, info, warn};

use minipc_config::LinkConfig;

use crate::client::ClientEndpoint;
use crate::error::Error;
use crate::logging::{Diagnostics, LogSink};
use crate::protocol::{DEFAULT_BASE_DIR, DEFAULT_TIMEOUT, MAX_NAME_LEN, socket_path};
use crate::server::ServerEndpoint;

/// Validity tag of a live link.
pub const LINK_MAGIC: u32 = 0xc0ff_ee99;

/// Which side of the conversation a link is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Client,
}

/// Per-link settings. Both ends must agree on `base_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Directory holding the server sockets.
    pub base_dir: PathBuf,
    /// How long a client call waits for its response.
    pub call_timeout: Duration,
    /// Bound on a server's read or write of one client frame.
    pub client_io_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            call_timeout: DEFAULT_TIMEOUT,
            client_io_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl From<&LinkConfig> for LinkOptions {
    fn from(config: &LinkConfig) -> Self {
        Self {
            base_dir: PathBuf::from(&config.base_dir),
            call_timeout: config.call_timeout(),
            client_io_timeout: config.client_io_timeout(),
        }
    }
}

pub(crate) enum Endpoint {
    Server(ServerEndpoint),
    Client(ClientEndpoint),
}

/// A server or client connection handle.
pub struct Link {
    magic: u32,
    mode: Mode,
    user_flags: u16,
    name: String,
    path: PathBuf,
    pub(crate) options: LinkOptions,
    pub(crate) endpoint: Option<Endpoint>,
    pub(crate) diag: Diagnostics,
}

/// Names become a single path component under the base directory.
fn validate_name(name: &str) -> Result<(), Error> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Connect to `path`, giving up after `timeout`.
///
/// A Unix-domain connect to a full backlog waits at most the socket's send
/// timeout, then fails with `EAGAIN`.
fn connect_within(path: &Path, timeout: Duration) -> Result<UnixStream, Error> {
    let fd = socket(AddressFamily::Unix, SockType::Stream, SockFlag::SOCK_CLOEXEC, None)
        .map_err(io::Error::from)?;
    // A zero send timeout means "wait forever".
    let micros = i64::try_from(timeout.as_micros()).unwrap_or(i64::MAX).max(1);
    setsockopt(&fd, sockopt::SendTimeout, &TimeVal::microseconds(micros))
        .map_err(io::Error::from)?;
    let addr = UnixAddr::new(path).map_err(io::Error::from)?;

    match connect(fd.as_raw_fd(), &addr) {
        Ok(()) => Ok(UnixStream::from(fd)),
        Err(Errno::ENOENT) => Err(Error::NoSuchServer(path.to_path_buf())),
        Err(Errno::ECONNREFUSED) => Err(Error::ConnectionRefused(path.to_path_buf())),
        Err(Errno::EAGAIN) => Err(Error::Timeout(timeout)),
        Err(errno) => Err(Error::Io(io::Error::from(errno))),
    }
}

impl Link {
    /// Create a server listening under the default base directory.
    pub fn create_server(name: &str, user_flags: u16) -> Result<Self, Error> {
        Self::create_server_with(name, user_flags, LinkOptions::default())
    }

    /// Create a server listening at `<options.base_dir>/<name>`.
    ///
    /// A socket file left behind by a dead server is replaced; one that
    /// still accepts connections makes this fail with [`Error::PathInUse`].
    pub fn create_server_with(
        name: &str,
        user_flags: u16,
        options: LinkOptions,
    ) -> Result<Self, Error> {
        validate_name(name)?;
        let path = socket_path(&options.base_dir, name);
        fs::create_dir_all(&options.base_dir)?;

        if let Ok(meta) = fs::symlink_metadata(&path) {
            if !meta.file_type().is_socket() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                )));
            }
            match connect_within(&path, options.call_timeout) {
                Ok(_) | Err(Error::Timeout(_)) => return Err(Error::PathInUse(path)),
                Err(_) => {
                    debug!(path = %path.display(), "removing stale socket");
                    fs::remove_file(&path)?;
                }
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse => Error::PathInUse(path.clone()),
            _ => Error::Io(e),
        })?;
        info!(name, path = %path.display(), "server listening");

        let mut link = Self::new(Mode::Server, name, user_flags, path, options);
        link.endpoint = Some(Endpoint::Server(ServerEndpoint::new(listener)));
        link.diag.line(format_args!("server listening at {}", link.path.display()));
        Ok(link)
    }

    /// Connect to the server called `name` under the default base directory.
    pub fn create_client(name: &str, user_flags: u16) -> Result<Self, Error> {
        Self::create_client_with(name, user_flags, LinkOptions::default())
    }

    /// Connect to the server listening at `<options.base_dir>/<name>`.
    pub fn create_client_with(
        name: &str,
        user_flags: u16,
        options: LinkOptions,
    ) -> Result<Self, Error> {
        validate_name(name)?;
        let path = socket_path(&options.base_dir, name);
        let stream = connect_within(&path, options.call_timeout)?;
        debug!(name, path = %path.display(), "client connected");

        let mut link = Self::new(Mode::Client, name, user_flags, path, options);
        link.endpoint = Some(Endpoint::Client(ClientEndpoint::new(stream)));
        Ok(link)
    }

    fn new(mode: Mode, name: &str, user_flags: u16, path: PathBuf, options: LinkOptions) -> Self {
        Self {
            magic: LINK_MAGIC,
            mode,
            user_flags,
            name: name.to_string(),
            path,
            options,
            endpoint: None,
            diag: Diagnostics::new(name),
        }
    }

    /// Release every socket and export and invalidate the handle.
    ///
    /// Only the first call succeeds; later calls, like any other use of a
    /// closed link, return [`Error::InvalidHandle`].
    pub fn close(&mut self) -> Result<(), Error> {
        self.check()?;
        self.magic = 0;
        self.diag.line(format_args!("closing"));
        self.diag.set(None);

        if let Some(Endpoint::Server(server)) = self.endpoint.take() {
            let clients = server.clients.len();
            drop(server);
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove socket file");
            }
            info!(name = %self.name, clients, "server closed");
        } else {
            debug!(name = %self.name, "client closed");
        }
        Ok(())
    }

    /// Attach or detach the diagnostic sink.
    pub fn set_log_sink(&mut self, sink: Option<LogSink>) -> Result<(), Error> {
        self.check()?;
        self.diag.set(sink);
        Ok(())
    }

    /// Whether the validity tag is intact.
    pub fn is_valid(&self) -> bool {
        self.magic == LINK_MAGIC
    }

    pub fn name(&self) -> Result<&str, Error> {
        self.check()?;
        Ok(&self.name)
    }

    pub fn mode(&self) -> Result<Mode, Error> {
        self.check()?;
        Ok(self.mode)
    }

    /// Caller-supplied flags, passed through untouched.
    pub fn user_flags(&self) -> Result<u16, Error> {
        self.check()?;
        Ok(self.user_flags)
    }

    pub fn socket_path(&self) -> Result<&Path, Error> {
        self.check()?;
        Ok(&self.path)
    }

    /// Descriptor of the listening socket (server) or the connection (client),
    /// for hosts that fold the link into their own poll loop.
    pub fn fileno(&self) -> Result<RawFd, Error> {
        self.check()?;
        match self.endpoint.as_ref() {
            Some(Endpoint::Server(server)) => Ok(server.listener.as_raw_fd()),
            Some(Endpoint::Client(client)) => client
                .stream
                .as_ref()
                .map(|s| s.as_raw_fd())
                .ok_or(Error::LinkBroken),
            None => Err(Error::InvalidHandle),
        }
    }

    /// The single gate in front of every operation.
    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::InvalidHandle)
        }
    }

    pub(crate) fn server_ref(&self) -> Result<&ServerEndpoint, Error> {
        self.check()?;
        match self.endpoint.as_ref() {
            Some(Endpoint::Server(server)) => Ok(server),
            Some(Endpoint::Client(_)) => Err(Error::WrongMode {
                expected: Mode::Server,
            }),
            None => Err(Error::InvalidHandle),
        }
    }

    pub(crate) fn server_parts(&mut self) -> Result<(&mut ServerEndpoint, &mut Diagnostics), Error> {
        self.check()?;
        match self.endpoint.as_mut() {
            Some(Endpoint::Server(server)) => Ok((server, &mut self.diag)),
            Some(Endpoint::Client(_)) => Err(Error::WrongMode {
                expected: Mode::Server,
            }),
            None => Err(Error::InvalidHandle),
        }
    }

    pub(crate) fn client_parts(
        &mut self,
    ) -> Result<(&mut ClientEndpoint, &LinkOptions, &mut Diagnostics), Error> {
        self.check()?;
        match self.endpoint.as_mut() {
            Some(Endpoint::Client(client)) => Ok((client, &self.options, &mut self.diag)),
            Some(Endpoint::Server(_)) => Err(Error::WrongMode {
                expected: Mode::Client,
            }),
            None => Err(Error::InvalidHandle),
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if self.is_valid() {
            let _ = self.close();
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("valid", &self.is_valid())
            .field("mode", &self.mode)
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> LinkOptions {
        LinkOptions {
            base_dir: dir.path().to_path_buf(),
            ..LinkOptions::default()
        }
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("sample").is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(matches!(
            validate_name(&"x".repeat(MAX_NAME_LEN + 1)),
            Err(Error::NameTooLong { len: 21, max: 20 })
        ));
        for bad in ["", ".", "..", "a/b", "nul\0"] {
            assert!(matches!(validate_name(bad), Err(Error::InvalidName(_))), "{bad:?}");
        }
    }

    #[test]
    fn test_default_options() {
        let opts = LinkOptions::default();
        assert_eq!(opts.base_dir, PathBuf::from("/tmp/.minipc"));
        assert_eq!(opts.call_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_options_from_config() {
        let config = LinkConfig {
            base_dir: "/run/minipc".to_string(),
            call_timeout_ms: 250,
            client_io_timeout_ms: 500,
        };
        let opts = LinkOptions::from(&config);
        assert_eq!(opts.base_dir, PathBuf::from("/run/minipc"));
        assert_eq!(opts.call_timeout, Duration::from_millis(250));
        assert_eq!(opts.client_io_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_server_accessors_and_close() {
        let dir = TempDir::new().unwrap();
        let mut link = Link::create_server_with("acc", 0x1234, options(&dir)).unwrap();
        assert!(link.is_valid());
        assert_eq!(link.mode().unwrap(), Mode::Server);
        assert_eq!(link.user_flags().unwrap(), 0x1234);
        assert_eq!(link.name().unwrap(), "acc");
        assert_eq!(link.socket_path().unwrap(), dir.path().join("acc"));
        assert!(link.fileno().unwrap() >= 0);
        assert!(dir.path().join("acc").exists());

        link.close().unwrap();
        assert!(!link.is_valid());
        assert!(!dir.path().join("acc").exists());
        assert!(matches!(link.name(), Err(Error::InvalidHandle)));
        assert!(matches!(link.close(), Err(Error::InvalidHandle)));
        assert!(matches!(link.set_log_sink(None), Err(Error::InvalidHandle)));
    }

    #[test]
    fn test_server_creates_base_dir() {
        let dir = TempDir::new().unwrap();
        let opts = LinkOptions {
            base_dir: dir.path().join("nested"),
            ..LinkOptions::default()
        };
        let _link = Link::create_server_with("nested", 0, opts).unwrap();
        assert!(dir.path().join("nested").join("nested").exists());
    }

    #[test]
    fn test_regular_file_is_never_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes");
        fs::write(&path, b"keep me").unwrap();

        let err = Link::create_server_with("notes", 0, options(&dir)).unwrap_err();
        assert!(
            matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::AlreadyExists),
            "{err:?}"
        );
        assert_eq!(fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_connect_within_missing_path() {
        let dir = TempDir::new().unwrap();
        let err = connect_within(&dir.path().join("none"), Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::NoSuchServer(_)));
    }

    #[test]
    fn test_drop_removes_socket_file() {
        let dir = TempDir::new().unwrap();
        {
            let _link = Link::create_server_with("dropped", 0, options(&dir)).unwrap();
            assert!(dir.path().join("dropped").exists());
        }
        assert!(!dir.path().join("dropped").exists());
    }
}
