//! Per-link diagnostic sink.
//!
//! Every link emits `tracing` events. On top of that a caller may attach a
//! plain [`Write`] sink to a single link with [`Link::set_log_sink`] and get
//! human-readable trace lines for that link only. [`SharedSink`] is an
//! in-memory sink with a separate read handle, handy for tests and status
//! displays.
//!
//! [`Link::set_log_sink`]: crate::Link::set_log_sink

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Destination for a link's diagnostic lines.
pub type LogSink = Box<dyn Write + Send>;

/// Optional sink plus the link name used to prefix each line.
pub(crate) struct Diagnostics {
    link: String,
    sink: Option<LogSink>,
}

impl Diagnostics {
    pub(crate) fn new(link: &str) -> Self {
        Self {
            link: link.to_string(),
            sink: None,
        }
    }

    pub(crate) fn link_name(&self) -> &str {
        &self.link
    }

    pub(crate) fn set(&mut self, sink: Option<LogSink>) {
        self.sink = sink;
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Write one line; a failing sink is dropped rather than retried.
    pub(crate) fn line(&mut self, args: fmt::Arguments<'_>) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let written = writeln!(sink, "minipc[{}]: {args}", self.link).and_then(|()| sink.flush());
        if let Err(e) = written {
            tracing::warn!(link = %self.link, error = %e, "diagnostic sink failed, detaching");
            self.sink = None;
        }
    }
}

/// In-memory sink; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedSink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A boxed clone suitable for [`Link::set_log_sink`](crate::Link::set_log_sink).
    pub fn boxed(&self) -> LogSink {
        Box::new(self.clone())
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }

    /// Captured lines, in write order.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().map(|buf| buf.is_empty()).unwrap_or(true)
    }
}

impl Write for SharedSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .buffer
            .lock()
            .map_err(|_| io::Error::other("log buffer poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
