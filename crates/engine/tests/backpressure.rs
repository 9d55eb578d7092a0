//! A slow subscriber must not make the server's read cursor advance past
//! what it has actually been sent: a round with no room for even one
//! subscriber is skipped for everybody and retried, rather than letting the
//! cursor race ahead and permanently lose the bytes a laggard missed.
//!
//! This drives a bare `ServerEngine` directly (not the usual client
//! harness) so the test can act as its own deliberately slow subscriber: it
//! stops reading its socket for a while, to force the server's per-session
//! write buffer to back up, then resumes and checks that every block it
//! eventually receives is exactly contiguous with the last, with nothing
//! skipped or duplicated.

use std::fs;
use std::io::Write as _;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::oneshot;

use engine::ServerEngine;
use wire::{Decoded, Header, PacketKind};

/// Small enough that a handful of un-drained blocks exceeds it, so the test
/// doesn't depend on the 4 MiB production default ever filling up.
const TEST_SESSION_CAPACITY: usize = 16 * 1024;

#[tokio::test]
async fn slow_subscriber_never_loses_or_duplicates_bytes() {
    let source_dir = tempfile::tempdir().unwrap();
    let source_path = source_dir.path().join("big.log");
    let initial = vec![b'a'; 20 * 1024];
    fs::write(&source_path, &initial).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ServerEngine::with_listener_and_session_capacity(
        listener,
        source_dir.path(),
        Regex::new(".*").unwrap(),
        false,
        false,
        TEST_SESSION_CAPACITY,
    );
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server_task = tokio::spawn(server.run(Box::pin(async move {
        let _ = shutdown_rx.await;
    })));

    // A tiny kernel receive buffer makes a stalled reader back up quickly,
    // instead of depending on the OS default (often well over 100 KiB).
    let socket = TcpSocket::new_v4().unwrap();
    socket.set_recv_buffer_size(2 * 1024).unwrap();
    let mut stream = socket.connect(addr).await.unwrap();
    stream.set_nodelay(true).unwrap();

    let mut inbox = iobuf::IOBuffer::new(1024 * 1024);
    let mut scratch = [0u8; 4096];

    assert!(
        await_list_contains(&mut stream, &mut inbox, &mut scratch, "big.log", Duration::from_secs(2)).await,
        "server never reported the tracked file in a LIST response"
    );
    stream
        .write_all(&wire::encode_frame(&Header::stream_request("big.log", 0), &[]))
        .await
        .unwrap();

    // Drain the catch-up download, asserting every block's offset is
    // exactly where the previous one left off.
    let mut received = Vec::new();
    assert!(
        pump(&mut stream, &mut inbox, &mut scratch, &mut received, |r| r.len() >= initial.len(), Duration::from_secs(2)).await,
        "initial catch-up download never completed"
    );
    assert_eq!(received, initial, "initial catch-up did not match source content");

    // Stall: stop reading the socket entirely while the source grows well
    // past both the tiny kernel receive window and the shrunk session
    // write-buffer capacity, forcing at least one fully skipped round.
    let mut file = fs::OpenOptions::new().append(true).open(&source_path).unwrap();
    let chunk = vec![b'b'; 8 * 1024];
    for _ in 0..12 {
        file.write_all(&chunk).unwrap();
    }
    drop(file);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Resume reading. If the fix holds, the reconstructed stream stays
    // exactly contiguous (checked inside `pump`) and, once fully drained,
    // is byte-for-byte identical to the source: the stalled round was
    // retried, not dropped.
    let expected = fs::read(&source_path).unwrap();
    assert!(
        pump(&mut stream, &mut inbox, &mut scratch, &mut received, |r| r.len() >= expected.len(), Duration::from_secs(5)).await,
        "receiver never caught up to the fully appended source"
    );
    assert_eq!(
        received, expected,
        "receiver ended up with a gap, overlap, or corruption after a stalled round"
    );

    let _ = shutdown_tx.send(());
    let _ = server_task.await;
}

/// Reads whatever is already decodable out of `inbox`, reading more off
/// `stream` as needed, until `done` is satisfied or `timeout` elapses.
/// Every `Block` frame's offset must equal `received.len()` beforehand,
/// enforcing that the byte stream this subscriber sees is gap-free and
/// never overlapping, exactly the property the back-pressure fix protects.
async fn pump(
    stream: &mut tokio::net::TcpStream,
    inbox: &mut iobuf::IOBuffer,
    scratch: &mut [u8],
    received: &mut Vec<u8>,
    mut done: impl FnMut(&[u8]) -> bool,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        loop {
            match wire::decode_frame(inbox) {
                Decoded::Frame(frame) => {
                    if frame.header.packet == Some(PacketKind::Block) {
                        let offset = frame.header.offset.unwrap_or(-1);
                        assert_eq!(
                            offset,
                            received.len() as i64,
                            "non-contiguous block: offset {offset}, but {} bytes received so far",
                            received.len()
                        );
                        received.extend_from_slice(&frame.payload);
                    }
                }
                Decoded::Invalid(_) => {}
                Decoded::Incomplete => break,
            }
        }
        if done(received) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        match tokio::time::timeout(Duration::from_millis(100), stream.read(scratch)).await {
            Ok(Ok(0)) => return false,
            Ok(Ok(n)) => inbox.add(&scratch[..n]),
            Ok(Err(_)) => return false,
            Err(_) => {}
        }
    }
}

/// Polls `LIST` until the server reports `path` as tracked.
async fn await_list_contains(
    stream: &mut tokio::net::TcpStream,
    inbox: &mut iobuf::IOBuffer,
    scratch: &mut [u8],
    path: &str,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut next_request_at = tokio::time::Instant::now();
    loop {
        if tokio::time::Instant::now() >= next_request_at {
            let _ = stream.write_all(&wire::encode_frame(&Header::list_request(), &[])).await;
            next_request_at = tokio::time::Instant::now() + Duration::from_millis(100);
        }
        loop {
            match wire::decode_frame(inbox) {
                Decoded::Frame(frame) => {
                    let is_list = matches!(frame.header.packet, Some(PacketKind::List) | Some(PacketKind::ListPartial));
                    if is_list {
                        if let Ok(list) = wire::list::decode(&frame.payload) {
                            if list.contains_key(path) {
                                return true;
                            }
                        }
                    }
                }
                Decoded::Invalid(_) => {}
                Decoded::Incomplete => break,
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        if let Ok(Ok(n)) = tokio::time::timeout(Duration::from_millis(50), stream.read(scratch)).await {
            if n > 0 {
                inbox.add(&scratch[..n]);
            }
        }
    }
}
