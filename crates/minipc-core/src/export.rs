//! Export table: the functions a server makes callable.
//!
//! Entries are kept in export order and looked up linearly by identifier;
//! servers export tens of functions, not thousands. Identifiers are unique
//! within a table, so a lookup never has to choose between two entries.

use std::fmt;

use tracing::debug;

use crate::error::Error;
use crate::link::Link;
use crate::protocol::{MAX_EXPORTS, MAX_NAME_LEN, MAX_PAYLOAD_WORDS};
use crate::types::{Prototype, Value, max_words};

/// Failure reported by a handler; the code travels to the caller verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("handler failed with code {code}")]
pub struct HandlerError {
    pub code: i32,
}

impl HandlerError {
    /// Code sent when a handler returns a value that does not fit its
    /// declared return tag.
    pub const RETURN_MISMATCH: i32 = -1;

    pub const fn new(code: i32) -> Self {
        Self { code }
    }
}

/// The server-side body of an exported function.
///
/// Handlers run on the thread driving [`Link::server_action`] and block the
/// whole loop while they run.
pub trait Handler: Send {
    fn call(&mut self, args: &[Value]) -> Result<Value, HandlerError>;
}

impl<F> Handler for F
where
    F: FnMut(&[Value]) -> Result<Value, HandlerError> + Send,
{
    fn call(&mut self, args: &[Value]) -> Result<Value, HandlerError> {
        self(args)
    }
}

/// A prototype bound to the handler that implements it.
pub struct Descriptor {
    pub prototype: Prototype,
    handler: Box<dyn Handler>,
}

impl Descriptor {
    pub fn new(prototype: Prototype, handler: impl Handler + 'static) -> Self {
        Self {
            prototype,
            handler: Box::new(handler),
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("prototype", &self.prototype)
            .finish_non_exhaustive()
    }
}

pub(crate) struct ExportEntry {
    pub(crate) name: String,
    pub(crate) prototype: Prototype,
    pub(crate) handler: Box<dyn Handler>,
}

/// Registry of exported functions owned by a server link.
#[derive(Default)]
pub struct ExportTable {
    entries: Vec<ExportEntry>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an export. Duplicate identifiers are rejected, never replaced.
    pub fn insert(&mut self, name: &str, descriptor: Descriptor) -> Result<(), Error> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        let id = descriptor.prototype.id;
        if self.lookup(id).is_some() {
            return Err(Error::DuplicateExport(id));
        }
        if self.entries.len() >= MAX_EXPORTS {
            return Err(Error::CapacityExceeded(format!(
                "server already exports {MAX_EXPORTS} functions"
            )));
        }
        let arg_words = max_words(&descriptor.prototype.args);
        let ret_words = descriptor.prototype.ret.max_words();
        if arg_words > MAX_PAYLOAD_WORDS || ret_words > MAX_PAYLOAD_WORDS {
            return Err(Error::CapacityExceeded(format!(
                "{name}: signature needs up to {} words, a message holds {MAX_PAYLOAD_WORDS}",
                arg_words.max(ret_words)
            )));
        }
        self.entries.push(ExportEntry {
            name: name.to_string(),
            prototype: descriptor.prototype,
            handler: descriptor.handler,
        });
        Ok(())
    }

    /// Remove the most recently exported entry called `name`.
    pub fn remove(&mut self, name: &str) -> Result<Prototype, Error> {
        let index = self
            .entries
            .iter()
            .rposition(|entry| entry.name == name)
            .ok_or_else(|| Error::NotExported(name.to_string()))?;
        Ok(self.entries.remove(index).prototype)
    }

    pub fn lookup(&self, id: u32) -> Option<&Prototype> {
        self.entries
            .iter()
            .find(|entry| entry.prototype.id == id)
            .map(|entry| &entry.prototype)
    }

    pub(crate) fn lookup_mut(&mut self, id: u32) -> Option<&mut ExportEntry> {
        self.entries.iter_mut().find(|entry| entry.prototype.id == id)
    }

    /// `(identifier, name)` of every export, in export order.
    pub fn list(&self) -> Vec<(u32, &str)> {
        self.entries
            .iter()
            .map(|entry| (entry.prototype.id, entry.name.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ExportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}

impl Link {
    /// Make `descriptor` callable on this server under `name`.
    pub fn export(&mut self, name: &str, descriptor: Descriptor) -> Result<(), Error> {
        let id = descriptor.prototype.id;
        let (server, diag) = self.server_parts()?;
        server.exports.insert(name, descriptor)?;
        debug!(link = %diag.link_name(), name, id = format_args!("{id:#010x}"), "exported");
        diag.line(format_args!("exported {name} as {id:#010x}"));
        Ok(())
    }

    /// Withdraw the export called `name`.
    pub fn withdraw(&mut self, name: &str) -> Result<(), Error> {
        let (server, diag) = self.server_parts()?;
        let prototype = server.exports.remove(name)?;
        debug!(link = %diag.link_name(), name, id = format_args!("{:#010x}", prototype.id), "withdrawn");
        diag.line(format_args!("withdrew {name}"));
        Ok(())
    }

    /// `(identifier, name)` of every function exported by this server.
    pub fn exports(&self) -> Result<Vec<(u32, String)>, Error> {
        let server = self.server_ref()?;
        Ok(server
            .exports
            .list()
            .into_iter()
            .map(|(id, name)| (id, name.to_string()))
            .collect())
    }
}
