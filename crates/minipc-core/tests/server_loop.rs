//! Server loop behavior driven directly from the test thread.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use minipc_core::{
    Descriptor, Error, HandlerError, Link, MAX_CLIENTS, Prototype, SharedSink, TypeTag, Value,
    ident,
};
use minipc_test_utils::server::ServerThread;
use minipc_test_utils::socket::TestSocketDir;
use pretty_assertions::assert_eq;

const TICK: Option<Duration> = Some(Duration::from_millis(50));

fn ping_prototype() -> Prototype {
    Prototype::new(ident(b"ping"), Vec::new(), TypeTag::UInt32)
}

fn ping_server(dir: &TestSocketDir, name: &str) -> Link {
    let mut server = dir.server(name);
    server
        .export(
            "ping",
            Descriptor::new(ping_prototype(), |_: &[Value]| -> Result<Value, HandlerError> {
                Ok(Value::UInt32(1))
            }),
        )
        .unwrap();
    server
}

/// Run the loop until a whole tick passes without activity.
fn drain(server: &mut Link) -> usize {
    let mut total = 0;
    loop {
        match server.server_action(TICK).unwrap() {
            0 => return total,
            n => total += n,
        }
    }
}

#[test_log::test]
fn test_idle_poll_times_out_with_zero_events() {
    let dir = TestSocketDir::new();
    let mut server = ping_server(&dir, "idle");
    assert_eq!(server.server_action(Some(Duration::ZERO)).unwrap(), 0);
    assert_eq!(server.server_action(TICK).unwrap(), 0);
}

#[test_log::test]
fn test_client_limit() {
    let dir = TestSocketDir::new();
    let mut server = ping_server(&dir, "crowded");

    let mut clients: Vec<Link> = (0..=MAX_CLIENTS).map(|_| dir.client("crowded")).collect();
    assert_eq!(drain(&mut server), MAX_CLIENTS + 1);
    assert_eq!(server.client_count().unwrap(), MAX_CLIENTS);
    assert_eq!(server.readiness_set().unwrap().len(), MAX_CLIENTS + 1);

    let _server = ServerThread::spawn(server);
    let (admitted, rejected) = clients.split_at_mut(MAX_CLIENTS);
    for client in admitted {
        assert_eq!(client.invoke(&ping_prototype(), &[]).unwrap(), Value::UInt32(1));
    }
    let err = rejected[0].invoke(&ping_prototype(), &[]).unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err:?}");
}

#[test_log::test]
fn test_trickling_client_cannot_stall_the_loop() {
    let io_timeout = Duration::from_millis(300);
    let dir = TestSocketDir::new().with_client_io_timeout(io_timeout);
    let server = ServerThread::spawn(ping_server(&dir, "trickle"));

    // A valid ping request, sent one byte at a time.
    let mut frame = Vec::new();
    frame.extend_from_slice(&1u32.to_be_bytes());
    frame.extend_from_slice(&ident(b"ping").to_be_bytes());
    let mut slow = UnixStream::connect(dir.socket("trickle")).unwrap();
    let trickler = thread::spawn(move || {
        for byte in frame {
            if slow.write_all(&[byte]).is_err() {
                return;
            }
            thread::sleep(Duration::from_millis(150));
        }
    });
    thread::sleep(Duration::from_millis(50));

    let mut client = dir.client("trickle");
    let start = Instant::now();
    assert_eq!(client.invoke(&ping_prototype(), &[]).unwrap(), Value::UInt32(1));
    let elapsed = start.elapsed();
    assert!(elapsed < Duration::from_millis(800), "{elapsed:?}");

    trickler.join().unwrap();
    let server = server.stop();
    assert_eq!(server.client_count().unwrap(), 1);
}

#[test_log::test]
fn test_disconnect_frees_slot() {
    let dir = TestSocketDir::new();
    let mut server = ping_server(&dir, "churn");

    let mut first = dir.client("churn");
    let _second = dir.client("churn");
    drain(&mut server);
    assert_eq!(server.client_count().unwrap(), 2);

    first.close().unwrap();
    drain(&mut server);
    assert_eq!(server.client_count().unwrap(), 1);
}

#[test_log::test]
fn test_framing_violations_drop_the_client() {
    let dir = TestSocketDir::new();
    let mut server = ping_server(&dir, "strict");

    let mut empty = UnixStream::connect(dir.socket("strict")).unwrap();
    let mut huge = UnixStream::connect(dir.socket("strict")).unwrap();
    drain(&mut server);
    assert_eq!(server.client_count().unwrap(), 2);

    empty.write_all(&0u32.to_be_bytes()).unwrap();
    huge.write_all(&1000u32.to_be_bytes()).unwrap();
    drain(&mut server);
    assert_eq!(server.client_count().unwrap(), 0);
}

#[test_log::test]
fn test_readiness_set_tracks_clients() {
    let dir = TestSocketDir::new();
    let mut server = ping_server(&dir, "fds");
    assert_eq!(server.readiness_set().unwrap(), vec![server.fileno().unwrap()]);

    let client = dir.client("fds");
    drain(&mut server);
    let fds = server.readiness_set().unwrap();
    assert_eq!(fds.len(), 2);
    assert_eq!(fds[0], server.fileno().unwrap());
    assert!(client.fileno().unwrap() >= 0);
}

#[test_log::test]
fn test_log_sink_lines() {
    let dir = TestSocketDir::new();
    let mut server = ping_server(&dir, "chatty");
    let sink = SharedSink::new();
    server.set_log_sink(Some(sink.boxed())).unwrap();

    let client = dir.client("chatty");
    drain(&mut server);
    drop(client);
    drain(&mut server);

    assert_eq!(
        sink.lines(),
        vec![
            "minipc[chatty]: accepted client in slot 0",
            "minipc[chatty]: client in slot 0 disconnected",
        ]
    );
}

#[test_log::test]
fn test_served_link_comes_back_open() {
    let dir = TestSocketDir::new();
    let thread = ServerThread::spawn(ping_server(&dir, "handoff"));
    let mut client = dir.client("handoff");
    assert_eq!(client.invoke(&ping_prototype(), &[]).unwrap(), Value::UInt32(1));

    let mut server = thread.stop();
    assert!(server.is_valid());
    assert_eq!(server.client_count().unwrap(), 1);
    server.close().unwrap();
    assert!(!dir.socket("handoff").exists());
}
