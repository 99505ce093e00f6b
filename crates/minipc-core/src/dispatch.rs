//! Turning one decoded request into exactly one response.

use tracing::{debug, trace, warn};

use crate::export::{ExportTable, HandlerError};
use crate::marshal::{marshal_ret, unmarshal_args};
use crate::protocol::{Request, Response};

/// Look up the identifier, decode the arguments, run the handler, and encode
/// its result. Every failure becomes an error response; nothing here can
/// take the server down.
pub fn handle_request(exports: &mut ExportTable, request: &Request) -> Response {
    let id = request.id;
    let Some(entry) = exports.lookup_mut(id) else {
        debug!(id = format_args!("{id:#010x}"), "unknown function");
        return Response::unknown_function(id);
    };

    let args = match unmarshal_args(entry.prototype.arg_signature(), &request.args) {
        Ok(args) => args,
        Err(e) => {
            debug!(function = %entry.name, error = %e, "malformed arguments");
            return Response::malformed(id, e.fault());
        }
    };

    trace!(function = %entry.name, args = args.len(), "invoking handler");
    let value = match entry.handler.call(&args) {
        Ok(value) => value,
        Err(HandlerError { code }) => {
            debug!(function = %entry.name, code, "handler failed");
            return Response::handler_error(id, code);
        }
    };

    match marshal_ret(entry.prototype.ret, &value) {
        Ok(payload) => Response::success(id, payload),
        Err(e) => {
            warn!(function = %entry.name, error = %e, "handler returned a value that does not fit its prototype");
            Response::handler_error(id, HandlerError::RETURN_MISMATCH)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Descriptor;
    use crate::protocol::{Fault, Status};
    use crate::types::{Prototype, TypeTag, Value, ident};
    use pretty_assertions::assert_eq;

    const SUM: u32 = ident(b"sum");

    fn table() -> ExportTable {
        let mut table = ExportTable::new();
        let sum = Prototype::new(SUM, [TypeTag::Int32, TypeTag::Int32], TypeTag::Int32);
        table
            .insert(
                "sum",
                Descriptor::new(sum, |args: &[Value]| -> Result<Value, HandlerError> {
                    let a = args[0].as_i32().unwrap_or_default();
                    let b = args[1].as_i32().unwrap_or_default();
                    Ok(Value::Int32(a.wrapping_add(b)))
                }),
            )
            .unwrap();
        let fail = Prototype::new(2, Vec::new(), TypeTag::Int32);
        table
            .insert(
                "fail",
                Descriptor::new(fail, |_: &[Value]| -> Result<Value, HandlerError> {
                    Err(HandlerError::new(42))
                }),
            )
            .unwrap();
        let liar = Prototype::new(3, Vec::new(), TypeTag::Int32);
        table
            .insert(
                "liar",
                Descriptor::new(liar, |_: &[Value]| -> Result<Value, HandlerError> {
                    Ok(Value::String("not an int".into()))
                }),
            )
            .unwrap();
        table
    }

    #[test]
    fn test_success() {
        let mut table = table();
        let resp = handle_request(&mut table, &Request::new(SUM, vec![2, 3]));
        assert_eq!(resp, Response::success(SUM, vec![5]));
    }

    #[test]
    fn test_unknown_function() {
        let mut table = table();
        let resp = handle_request(&mut table, &Request::new(0xdead_beef, vec![]));
        assert_eq!(resp.status, Status::UnknownFunction);
        assert_eq!(resp.id, 0xdead_beef);
        assert!(resp.payload.is_empty());
    }

    #[test]
    fn test_truncated_and_trailing_arguments() {
        let mut table = table();
        let resp = handle_request(&mut table, &Request::new(SUM, vec![2]));
        assert_eq!(resp, Response::malformed(SUM, Fault::Truncated));

        let resp = handle_request(&mut table, &Request::new(SUM, vec![2, 3, 4]));
        assert_eq!(resp, Response::malformed(SUM, Fault::Mismatch));
    }

    #[test]
    fn test_handler_error_code_is_forwarded() {
        let mut table = table();
        let resp = handle_request(&mut table, &Request::new(2, vec![]));
        assert_eq!(resp, Response::handler_error(2, 42));
    }

    #[test]
    fn test_return_mismatch() {
        let mut table = table();
        let resp = handle_request(&mut table, &Request::new(3, vec![]));
        assert_eq!(resp, Response::handler_error(3, HandlerError::RETURN_MISMATCH));
    }
}
