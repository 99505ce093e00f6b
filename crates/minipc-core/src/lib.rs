#![deny(unsafe_code)]

//! minipc core: a small RPC transport over Unix-domain stream sockets.
//!
//! A server [`Link`] listens at `<base_dir>/<name>`, exports functions under
//! 32-bit identifiers, and is driven by repeated [`Link::server_action`]
//! calls. A client [`Link`] connects to it and performs synchronous calls.
//! Arguments and return values travel as type-tagged 32-bit words; see
//! [`marshal`] for the encoding and [`protocol`] for the framing.
//!
//! ```no_run
//! use minipc_core::{Descriptor, HandlerError, Link, Prototype, TypeTag, Value, ident};
//!
//! let sum = Prototype::new(ident(b"sum"), [TypeTag::Int32, TypeTag::Int32], TypeTag::Int32);
//!
//! let mut server = Link::create_server("sample", 0)?;
//! server.export(
//!     "sum",
//!     Descriptor::new(sum.clone(), |args: &[Value]| -> Result<Value, HandlerError> {
//!         let a = args[0].as_i32().unwrap_or_default();
//!         let b = args[1].as_i32().unwrap_or_default();
//!         Ok(Value::Int32(a.wrapping_add(b)))
//!     }),
//! )?;
//! loop {
//!     server.server_action(None)?;
//! }
//! # Ok::<(), minipc_core::Error>(())
//! ```

/// Client call path.
pub mod client;
/// Request dispatch against an export table.
pub mod dispatch;
/// Error type shared by all link operations.
pub mod error;
/// Exported functions and handlers.
pub mod export;
/// Link handles.
pub mod link;
/// Per-link diagnostic sink.
pub mod logging;
/// Value encoding.
pub mod marshal;
/// Wire constants and framing.
pub mod protocol;
/// Server loop.
pub mod server;
/// Type tags, values, and prototypes.
pub mod types;

pub use error::Error;
pub use export::{Descriptor, ExportTable, Handler, HandlerError};
pub use link::{LINK_MAGIC, Link, LinkOptions, Mode};
pub use logging::{LogSink, SharedSink};
pub use marshal::{CodecError, marshal_args, marshal_ret, unmarshal_args, unmarshal_ret};
pub use protocol::{
    DEFAULT_BASE_DIR, DEFAULT_TIMEOUT, Fault, MAX_CLIENTS, MAX_EXPORTS, MAX_NAME_LEN,
    MAX_PAYLOAD_WORDS, Request, Response, Status,
};
pub use types::{Prototype, TypeTag, Value, ident};

// Links may be handed to a dedicated server thread.
const _: fn() = || {
    fn is_send<T: Send>() {}
    is_send::<Link>();
};
