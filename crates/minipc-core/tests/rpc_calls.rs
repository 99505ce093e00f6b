//! End-to-end calls between a client and a server on a background thread.

use std::time::{Duration, Instant};

use minipc_core::{
    Descriptor, Error, Fault, HandlerError, Link, Prototype, Request, Status, TypeTag, Value,
    ident,
};
use minipc_test_utils::server::ServerThread;
use minipc_test_utils::socket::TestSocketDir;
use pretty_assertions::assert_eq;

const SUM: u32 = ident(b"sum");
const ECHO: u32 = ident(b"echo");
const FAIL: u32 = ident(b"fail");

fn sum_prototype() -> Prototype {
    Prototype::new(SUM, [TypeTag::Int32, TypeTag::Int32], TypeTag::Int32)
}

fn sum(args: &[Value]) -> Result<Value, HandlerError> {
    let a = args[0].as_i32().unwrap_or_default();
    let b = args[1].as_i32().unwrap_or_default();
    Ok(Value::Int32(a.wrapping_add(b)))
}

/// A server exporting `sum`, `echo`, and `fail`.
fn sample_server(dir: &TestSocketDir) -> Link {
    let mut server = dir.server("sample");
    server.export("sum", Descriptor::new(sum_prototype(), sum)).unwrap();

    let echo = Prototype::new(
        ECHO,
        [
            TypeTag::String { max_len: 64 },
            TypeTag::Double,
            TypeTag::Int64,
            TypeTag::Struct { size: 6 },
        ],
        TypeTag::String { max_len: 256 },
    );
    server
        .export(
            "echo",
            Descriptor::new(echo, |args: &[Value]| -> Result<Value, HandlerError> {
                Ok(Value::String(format!(
                    "{}|{}|{}|{:?}",
                    args[0].as_str().unwrap_or_default(),
                    args[1].as_f64().unwrap_or_default(),
                    args[2].as_i64().unwrap_or_default(),
                    args[3].as_bytes().unwrap_or_default(),
                )))
            }),
        )
        .unwrap();

    let fail = Prototype::new(FAIL, Vec::new(), TypeTag::UInt32);
    server
        .export(
            "fail",
            Descriptor::new(fail, |_: &[Value]| -> Result<Value, HandlerError> {
                Err(HandlerError::new(7))
            }),
        )
        .unwrap();
    server
}

#[test_log::test]
fn test_sum() {
    let dir = TestSocketDir::new();
    let _server = ServerThread::spawn(sample_server(&dir));
    let mut client = dir.client("sample");

    let value = client
        .invoke(&sum_prototype(), &[Value::Int32(2), Value::Int32(3)])
        .unwrap();
    assert_eq!(value, Value::Int32(5));

    let value = client
        .invoke(&sum_prototype(), &[Value::Int32(i32::MAX), Value::Int32(1)])
        .unwrap();
    assert_eq!(value, Value::Int32(i32::MIN));
}

#[test_log::test]
fn test_mixed_signature() {
    let dir = TestSocketDir::new();
    let _server = ServerThread::spawn(sample_server(&dir));
    let mut client = dir.client("sample");

    let args = [
        Value::from("héllo"),
        Value::Double(-2.5),
        Value::Int64(-(1 << 40)),
        Value::Struct(vec![1, 2, 3, 4, 5, 6]),
    ];
    let sig = [
        TypeTag::String { max_len: 64 },
        TypeTag::Double,
        TypeTag::Int64,
        TypeTag::Struct { size: 6 },
    ];
    let value = client
        .call(ECHO, &sig, TypeTag::String { max_len: 256 }, &args)
        .unwrap();
    assert_eq!(value.as_str(), Some("héllo|-2.5|-1099511627776|[1, 2, 3, 4, 5, 6]"));
}

#[test_log::test]
fn test_unknown_function() {
    let dir = TestSocketDir::new();
    let _server = ServerThread::spawn(sample_server(&dir));
    let mut client = dir.client("sample");

    let missing = ident(b"nope");
    let err = client.call(missing, &[], TypeTag::None, &[]).unwrap_err();
    assert!(matches!(err, Error::UnknownFunction(id) if id == missing));

    // The link is still usable afterwards.
    assert!(client.is_connected());
    let value = client
        .invoke(&sum_prototype(), &[Value::Int32(1), Value::Int32(1)])
        .unwrap();
    assert_eq!(value, Value::Int32(2));
}

#[test_log::test]
fn test_truncated_arguments() {
    let dir = TestSocketDir::new();
    let _server = ServerThread::spawn(sample_server(&dir));
    let mut client = dir.client("sample");

    let err = client
        .call(SUM, &[TypeTag::Int32], TypeTag::Int32, &[Value::Int32(2)])
        .unwrap_err();
    assert!(matches!(err, Error::MalformedArguments(Fault::Truncated)));

    let response = client.call_raw(&Request::new(SUM, vec![2, 3, 4])).unwrap();
    assert_eq!(response.status, Status::MalformedArguments);
    assert_eq!(response.payload, vec![Fault::Mismatch as u32]);
}

#[test_log::test]
fn test_oversized_string_claim() {
    let dir = TestSocketDir::new();
    let _server = ServerThread::spawn(sample_server(&dir));
    let mut client = dir.client("sample");

    // String length word of 65 against a declared maximum of 64.
    let mut words = vec![65];
    words.extend(std::iter::repeat_n(0x4141_4141, 17));
    let response = client.call_raw(&Request::new(ECHO, words)).unwrap();
    assert_eq!(response.status, Status::MalformedArguments);
    assert_eq!(response.payload, vec![Fault::Oversized as u32]);
}

#[test_log::test]
fn test_handler_error() {
    let dir = TestSocketDir::new();
    let _server = ServerThread::spawn(sample_server(&dir));
    let mut client = dir.client("sample");

    let err = client.call(FAIL, &[], TypeTag::UInt32, &[]).unwrap_err();
    assert!(matches!(err, Error::HandlerFailed { code: 7 }));
}

#[test_log::test]
fn test_pipelined_requests_answered_in_order() {
    let dir = TestSocketDir::new();
    let _server = ServerThread::spawn(sample_server(&dir));
    let mut client = dir.client("sample");

    for i in 0..5u32 {
        client.send_request(&Request::new(SUM, vec![i, 100])).unwrap();
    }
    for i in 0..5u32 {
        let response = client.recv_response().unwrap();
        assert_eq!(response.id, SUM);
        assert_eq!(response.status, Status::Success);
        assert_eq!(response.payload, vec![i + 100]);
    }
}

#[test_log::test]
fn test_timeout_breaks_link() {
    let dir = TestSocketDir::new().with_call_timeout(Duration::from_millis(200));
    // Never polled: the connection sits in the backlog unanswered.
    let _server = sample_server(&dir);
    let mut client = dir.client("sample");

    let start = Instant::now();
    let err = client
        .invoke(&sum_prototype(), &[Value::Int32(2), Value::Int32(3)])
        .unwrap_err();
    let elapsed = start.elapsed();
    assert!(matches!(err, Error::Timeout(t) if t == Duration::from_millis(200)));
    assert!(elapsed >= Duration::from_millis(150), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");

    assert!(!client.is_connected());
    let err = client
        .invoke(&sum_prototype(), &[Value::Int32(2), Value::Int32(3)])
        .unwrap_err();
    assert!(matches!(err, Error::LinkBroken));
}

#[test_log::test]
fn test_unread_requests_time_out_on_send() {
    let dir = TestSocketDir::new().with_call_timeout(Duration::from_millis(200));
    let _server = sample_server(&dir);
    let mut client = dir.client("sample");

    // Fill the socket buffer of a server that never reads.
    let request = Request::new(ECHO, vec![0; 256]);
    let mut sent = 0;
    let err = loop {
        match client.send_request(&request) {
            Ok(()) => sent += 1,
            Err(e) => break e,
        }
        assert!(sent < 100_000, "socket buffer never filled");
    };
    assert!(matches!(err, Error::Timeout(t) if t == Duration::from_millis(200)), "{err:?}");

    assert!(!client.is_connected());
    assert!(matches!(client.send_request(&request), Err(Error::LinkBroken)));
}

#[test_log::test]
fn test_duplicate_export_keeps_first() {
    let dir = TestSocketDir::new();
    let mut server = sample_server(&dir);

    let impostor = Descriptor::new(sum_prototype(), |_: &[Value]| -> Result<Value, HandlerError> {
        Ok(Value::Int32(-1))
    });
    let err = server.export("sum2", impostor).unwrap_err();
    assert!(matches!(err, Error::DuplicateExport(SUM)));

    let _server = ServerThread::spawn(server);
    let mut client = dir.client("sample");
    let value = client
        .invoke(&sum_prototype(), &[Value::Int32(2), Value::Int32(3)])
        .unwrap();
    assert_eq!(value, Value::Int32(5));
}

#[test_log::test]
fn test_withdrawn_function_is_unknown() {
    let dir = TestSocketDir::new();
    let mut server = sample_server(&dir);
    server.withdraw("sum").unwrap();
    assert!(matches!(server.withdraw("sum"), Err(Error::NotExported(_))));
    assert_eq!(
        server.exports().unwrap(),
        vec![(ECHO, "echo".to_string()), (FAIL, "fail".to_string())]
    );

    let _server = ServerThread::spawn(server);
    let mut client = dir.client("sample");
    let err = client
        .invoke(&sum_prototype(), &[Value::Int32(2), Value::Int32(3)])
        .unwrap_err();
    assert!(matches!(err, Error::UnknownFunction(SUM)));
}

#[test_log::test]
fn test_client_side_encoding_errors_send_nothing() {
    let dir = TestSocketDir::new();
    let _server = ServerThread::spawn(sample_server(&dir));
    let mut client = dir.client("sample");

    let err = client
        .invoke(&sum_prototype(), &[Value::Int32(2), Value::from("three")])
        .unwrap_err();
    assert!(matches!(err, Error::Codec(_)));

    // Nothing went out, so the next answer still lines up.
    let value = client
        .invoke(&sum_prototype(), &[Value::Int32(2), Value::Int32(3)])
        .unwrap();
    assert_eq!(value, Value::Int32(5));
}

#[test_log::test]
fn test_server_gone_is_transport_error() {
    let dir = TestSocketDir::new();
    let server = ServerThread::spawn(sample_server(&dir));
    let mut client = dir.client("sample");
    client
        .invoke(&sum_prototype(), &[Value::Int32(2), Value::Int32(3)])
        .unwrap();

    let mut link = server.stop();
    link.close().unwrap();

    let err = client
        .invoke(&sum_prototype(), &[Value::Int32(2), Value::Int32(3)])
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err:?}");
    assert!(matches!(
        client.invoke(&sum_prototype(), &[Value::Int32(2), Value::Int32(3)]),
        Err(Error::LinkBroken)
    ));
}
