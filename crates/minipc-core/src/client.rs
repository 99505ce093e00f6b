//! Client call path.
//!
//! A call is one request frame out and one response frame back, with the
//! wait bounded by the link's call timeout. A client link that timed out or
//! lost its connection is broken for good: a late response could otherwise
//! be mistaken for the answer to the next call.

use std::io;
use std::os::unix::net::UnixStream;

use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::link::{Endpoint, Link};
use crate::marshal::{marshal_args, unmarshal_ret};
use crate::protocol::{
    DeadlineStream, Fault, MAX_RESPONSE_WORDS, Request, Response, Status, is_timeout, read_frame,
    write_frame,
};
use crate::types::{Prototype, TypeTag, Value};

pub(crate) struct ClientEndpoint {
    /// `None` once the link is broken.
    pub(crate) stream: Option<UnixStream>,
}

impl ClientEndpoint {
    pub(crate) fn new(stream: UnixStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    fn stream(&self) -> Result<&UnixStream, Error> {
        self.stream.as_ref().ok_or(Error::LinkBroken)
    }

    fn break_link(&mut self) {
        self.stream = None;
    }
}

/// Turn a non-success response into the matching error.
fn check_status(response: Response) -> Result<Vec<u32>, Error> {
    match response.status {
        Status::Success => Ok(response.payload),
        Status::UnknownFunction => Err(Error::UnknownFunction(response.id)),
        Status::MalformedArguments => {
            match response.payload.first().copied().and_then(Fault::from_word) {
                Some(fault) => Err(Error::MalformedArguments(fault)),
                None => Err(Error::Protocol(
                    "malformed-arguments response without a valid fault".into(),
                )),
            }
        }
        Status::HandlerError => match response.payload.first() {
            Some(&code) => Err(Error::HandlerFailed { code: code as i32 }),
            None => Err(Error::Protocol("handler-error response without a code".into())),
        },
    }
}

impl Link {
    /// Call the remote function `id` and decode its return value.
    pub fn call(
        &mut self,
        id: u32,
        arg_signature: &[TypeTag],
        ret: TypeTag,
        args: &[Value],
    ) -> Result<Value, Error> {
        self.check()?;
        let words = marshal_args(arg_signature, args)?;
        let response = self.call_raw(&Request::new(id, words))?;
        let payload = check_status(response)?;
        let value = unmarshal_ret(ret, &payload).inspect_err(|e| {
            warn!(id = format_args!("{id:#010x}"), error = %e, "undecodable return value");
        })?;
        Ok(value)
    }

    /// [`Link::call`] with the signatures taken from a shared prototype.
    pub fn invoke(&mut self, prototype: &Prototype, args: &[Value]) -> Result<Value, Error> {
        self.call(prototype.id, prototype.arg_signature(), prototype.ret, args)
    }

    /// Send a request and wait for the response that answers it.
    ///
    /// The status is returned as received; only transport failures and an
    /// identifier mismatch are errors here.
    pub fn call_raw(&mut self, request: &Request) -> Result<Response, Error> {
        self.send_request(request)?;
        let response = self.recv_response()?;
        if response.id != request.id {
            let (client, _, diag) = self.client_parts()?;
            client.break_link();
            diag.line(format_args!(
                "response for {:#010x} while waiting for {:#010x}",
                response.id, request.id
            ));
            return Err(Error::Protocol(format!(
                "response identifier {:#010x} does not match request {:#010x}",
                response.id, request.id
            )));
        }
        Ok(response)
    }

    /// Write one request frame without waiting for the answer. Responses
    /// come back in request order, so several requests may be in flight.
    ///
    /// The whole frame must go out within the call timeout; a server that
    /// stopped reading turns into [`Error::Timeout`] and breaks the link.
    pub fn send_request(&mut self, request: &Request) -> Result<(), Error> {
        let (client, options, diag) = self.client_parts()?;
        let timeout = options.call_timeout;
        let stream = client.stream()?;
        trace!(id = format_args!("{:#010x}", request.id), words = request.args.len(), "sending request");
        let written = write_frame(&mut DeadlineStream::new(stream, timeout), &request.to_words());
        match written {
            Ok(()) => Ok(()),
            Err(e) if is_timeout(&e) => {
                client.break_link();
                debug!(link = %diag.link_name(), ?timeout, "send timed out");
                diag.line(format_args!("request not accepted within {timeout:?}, link broken"));
                Err(Error::Timeout(timeout))
            }
            Err(e) => {
                client.break_link();
                diag.line(format_args!("send failed: {e}"));
                Err(Error::Io(e))
            }
        }
    }

    /// Wait, at most the call timeout, for the next response frame.
    pub fn recv_response(&mut self) -> Result<Response, Error> {
        let (client, options, diag) = self.client_parts()?;
        let timeout = options.call_timeout;
        let stream = client.stream()?;

        let mut reader = DeadlineStream::new(stream, timeout);
        let words = match read_frame(&mut reader, MAX_RESPONSE_WORDS) {
            Ok(words) => words,
            Err(e) if is_timeout(&e) => {
                client.break_link();
                debug!(link = %diag.link_name(), ?timeout, "call timed out");
                diag.line(format_args!("no response within {timeout:?}, link broken"));
                return Err(Error::Timeout(timeout));
            }
            Err(e) => {
                client.break_link();
                diag.line(format_args!("receive failed: {e}"));
                return Err(match e.kind() {
                    io::ErrorKind::InvalidData => Error::Protocol(e.to_string()),
                    _ => Error::Io(e),
                });
            }
        };

        Response::from_words(&words).map_err(|msg| {
            client.break_link();
            Error::Protocol(msg)
        })
    }

    /// Whether a client link still has its connection.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.endpoint.as_ref(),
            Some(Endpoint::Client(ClientEndpoint { stream: Some(_) }))
        ) && self.is_valid()
    }
}
