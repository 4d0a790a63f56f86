//! Integration tests for named channels.
//!
//! These tests create real named pipes and therefore only run on Windows.

#![cfg(windows)]

use std::io::{BufRead, ErrorKind, Read, Seek, SeekFrom, Write};
use std::thread;
use std::time::{Duration, Instant};

use sandboxie_bridge::ChannelError;
use sandboxie_bridge::pipe::{
    Buffering, ConnectTimeout, DEFAULT_BUFFER_SIZE, Direction, PipeClient, PipeServer,
};

const PREFIX: &str = r"\\.\pipe\testpipe";

fn pair(inbound: bool, outbound: bool) -> (PipeServer, PipeClient) {
    let server = PipeServer::temporary(PREFIX, inbound, outbound).expect("Failed to configure server");
    let client = PipeClient::new(server.name(), outbound, inbound).expect("Failed to configure client");
    assert_eq!(server.name(), client.name());
    (server, client)
}

#[test]
fn test_basic_inbound() {
    let (server, client) = pair(true, false);

    let mut sf = server.accept(true).unwrap();
    let mut cf = client.connect(ConnectTimeout::ServerDefault).unwrap();
    server.wait_for_connection(&sf).unwrap();

    cf.write_all(b"test").unwrap();
    cf.flush().unwrap();

    let mut buf = [0u8; 4];
    sf.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"test");
}

#[test]
fn test_basic_outbound() {
    let (server, client) = pair(false, true);

    let mut sf = server.accept(true).unwrap();
    let mut cf = client.connect(ConnectTimeout::ServerDefault).unwrap();
    server.wait_for_connection(&sf).unwrap();

    sf.write_all(b"test").unwrap();
    sf.flush().unwrap();

    let mut buf = [0u8; 4];
    cf.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"test");
}

#[test]
fn test_basic_duplex() {
    let (server, client) = pair(true, true);

    let mut sf = server.accept(true).unwrap();
    let mut cf = client.connect(ConnectTimeout::ServerDefault).unwrap();
    server.wait_for_connection(&sf).unwrap();

    sf.write_all(b"ping").unwrap();
    sf.flush().unwrap();
    cf.write_all(b"pong").unwrap();
    cf.flush().unwrap();

    let mut buf = [0u8; 4];
    sf.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"pong");
    cf.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");
}

/// Payloads larger than the OS buffer arrive complete while the writer blocks.
#[test]
fn test_payload_larger_than_buffer() {
    let (server, client) = pair(true, false);
    let payload: Vec<u8> = (0..DEFAULT_BUFFER_SIZE * 3).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let mut sf = server.accept(true).unwrap();
    let writer = thread::spawn(move || {
        let mut cf = client.connect(ConnectTimeout::ServerDefault).unwrap();
        cf.write_all(&payload).unwrap();
        cf.close().unwrap();
    });
    server.wait_for_connection(&sf).unwrap();

    let mut received = Vec::new();
    sf.read_to_end(&mut received).unwrap();
    writer.join().unwrap();

    assert_eq!(received, expected);
}

#[test]
fn test_broken_pipe() {
    let (server, client) = pair(true, false);

    let sf = server.accept(true).unwrap();
    let mut cf = client.connect(ConnectTimeout::ServerDefault).unwrap();
    server.wait_for_connection(&sf).unwrap();

    sf.close().unwrap();

    cf.write_all(b"test").unwrap();
    let err = cf.flush().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenPipe);

    let err = cf.close().unwrap_err();
    assert!(err.is_broken(), "{err:?}");
}

#[test]
fn test_unseekable() {
    let (server, client) = pair(true, false);

    let sf = server.accept(true).unwrap();
    let mut cf = client.connect(ConnectTimeout::ServerDefault).unwrap();
    server.wait_for_connection(&sf).unwrap();

    assert!(!cf.is_seekable());
    let err = cf.seek(SeekFrom::Start(42)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

/// accept() without skipping blocks until a client shows up.
#[test]
fn test_accept_wait() {
    let (server, client) = pair(true, false);

    let connector = thread::spawn(move || {
        thread::sleep(Duration::from_secs(2));
        let mut cf = client.connect(ConnectTimeout::ServerDefault).unwrap();
        cf.write_all(b"test").unwrap();
        cf.close().unwrap();
    });

    let mut sf = server.accept(false).unwrap();
    let mut buf = [0u8; 4];
    sf.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"test");

    connector.join().unwrap();
}

/// A second client times out while the only instance is taken, and gets in
/// as soon as the server creates another one.
#[test]
fn test_busy_pipe() {
    let (server, client) = pair(true, false);

    let sf = server.accept(true).unwrap();
    let _cf = client.connect(ConnectTimeout::ServerDefault).unwrap();
    server.wait_for_connection(&sf).unwrap();

    let err = client.connect(ConnectTimeout::ServerDefault).unwrap_err();
    assert!(matches!(err, ChannelError::Timeout { .. }), "{err:?}");

    let waiting = client.clone();
    let second = thread::spawn(move || {
        let _cf2 = waiting.connect(ConnectTimeout::Forever).unwrap();
        // Hold the connection so the server does not see it break.
        thread::sleep(Duration::from_secs(2));
    });

    thread::sleep(Duration::from_secs(2));
    let _sf2 = server.accept(false).unwrap();
    second.join().unwrap();
}

#[test]
fn test_busy_pipe_bounded_wait() {
    let (server, client) = pair(true, false);

    let sf = server.accept(true).unwrap();
    let _cf = client.connect(ConnectTimeout::ServerDefault).unwrap();
    server.wait_for_connection(&sf).unwrap();

    let started = Instant::now();
    let err = client
        .connect(ConnectTimeout::Bounded(Duration::from_millis(200)))
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ChannelError::Timeout { .. }), "{err:?}");
    assert!(elapsed >= Duration::from_millis(150), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
}

/// Unbuffered only affects writes; line reads still see the data.
#[test]
fn test_unbuffered_inbound_read_line() {
    let server = PipeServer::temporary(PREFIX, true, false)
        .unwrap()
        .with_buffering(Buffering::Unbuffered);
    let client = PipeClient::for_server(&server).with_buffering(Buffering::Unbuffered);

    let mut sf = server.accept(true).unwrap();
    let mut cf = client.connect(ConnectTimeout::ServerDefault).unwrap();
    server.wait_for_connection(&sf).unwrap();

    cf.write_all(b"diagnostic\n").unwrap();
    cf.close().unwrap();

    let mut line = String::new();
    sf.read_line(&mut line).unwrap();
    assert_eq!(line, "diagnostic\n");
}

#[test]
fn test_connection_broken_at_start() {
    let (server, client) = pair(true, false);

    let sf = server.accept(true).unwrap();
    drop(client.connect(ConnectTimeout::ServerDefault).unwrap());

    let err = server.wait_for_connection(&sf).unwrap_err();
    assert!(err.is_broken(), "{err:?}");
}

#[test]
fn test_connect_without_server() {
    let client = PipeClient::with_direction(r"\\.\pipe\testpipe_does_not_exist", Direction::Outbound);
    let err = client.connect(ConnectTimeout::ServerDefault).unwrap_err();
    assert!(matches!(err, ChannelError::Io { .. }), "{err:?}");
}

#[test]
fn test_complement_client_talks_to_server() {
    let server = PipeServer::temporary(PREFIX, false, true).unwrap();
    let client = PipeClient::for_server(&server);
    assert_eq!(client.direction(), Direction::Inbound);

    let mut sf = server.accept(true).unwrap();
    let mut cf = client.connect(ConnectTimeout::Bounded(Duration::from_secs(1))).unwrap();
    server.wait_for_connection(&sf).unwrap();

    sf.write_all(b"hi").unwrap();
    sf.close().unwrap();

    let mut received = String::new();
    cf.read_to_string(&mut received).unwrap();
    assert_eq!(received, "hi");
}
