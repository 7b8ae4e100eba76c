// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end agent protocol tests over loopback datagram sockets.

use std::fs;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use spyglass_agent::client::AgentClient;
use spyglass_agent::proto::{MAX_COMMAND_LEN, MSG_ACK_PREFIX, MSG_CMDFAIL, MSG_EXEC_READY, MSG_SUCCESS};
use spyglass_agent::server::AgentServer;

fn temp_path(name: &str) -> PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let mut path = std::env::temp_dir();
    path.push(format!(
        "spyglass-loopback-{}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed),
        name
    ));
    path
}

/// Start a server on an ephemeral loopback port, serving from a background thread.
fn start_server() -> (SocketAddr, PathBuf) {
    let log_path = temp_path("agent-log.txt");
    let mut server = AgentServer::bind("127.0.0.1:0", Some(log_path.clone())).unwrap();
    let addr = server.local_addr().unwrap();

    thread::spawn(move || {
        let _ = server.run();
    });

    (addr, log_path)
}

fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 13) as u8).collect()
}

#[test]
fn verify_import_round_trip() {
    let (addr, _log) = start_server();
    let client = AgentClient::connect(addr).unwrap();

    // Two full 8,192-byte chunks plus a one-byte tail.
    let payload = patterned_bytes(16385);
    let src = temp_path("import-src.bin");
    let dst = temp_path("import-dst.bin");
    fs::write(&src, &payload).unwrap();

    let echoed = client.import(&src, dst.to_str().unwrap()).unwrap();
    assert!(echoed.starts_with("impo "), "unexpected echo: {echoed}");

    let stored = fs::read(&dst).unwrap();
    assert_eq!(stored.len(), 16385);
    assert_eq!(stored, payload);

    fs::remove_file(src).unwrap();
    fs::remove_file(dst).unwrap();
}

#[test]
fn verify_import_wire_sequence() {
    // This test plays the guest against a real client: the full wire sequence of a 16,385-byte
    // import is asserted datagram by datagram.
    let guest = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = guest.local_addr().unwrap();

    let payload = patterned_bytes(16385);
    let src = temp_path("wire-src.bin");
    fs::write(&src, &payload).unwrap();

    let client_src = src.clone();
    let client_thread = thread::spawn(move || {
        let client = AgentClient::connect(addr).unwrap();
        client.import(&client_src, "guest-destination")
    });

    let mut buf = vec![0u8; 16384];

    // Command datagram.
    let (len, peer) = guest.recv_from(&mut buf).unwrap();
    let command = buf[..len].to_vec();
    assert_eq!(&command[..5], b"impo ");

    // Destination-open acknowledgement, then the 8-byte little-endian size.
    guest.send_to(MSG_SUCCESS, peer).unwrap();

    let (len, _) = guest.recv_from(&mut buf).unwrap();
    assert_eq!(len, 8);
    let total = u64::from_le_bytes(buf[..8].try_into().unwrap());
    assert_eq!(total, 16385);

    // Exactly one source-read ack before, and one write ack after, each of the three chunks.
    let mut received = Vec::new();
    for want in [8192usize, 8192, 1] {
        let (len, _) = guest.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], MSG_SUCCESS, "missing source-read ack");

        let (len, _) = guest.recv_from(&mut buf).unwrap();
        assert_eq!(len, want, "chunk length mismatch");
        received.extend_from_slice(&buf[..len]);

        guest.send_to(MSG_SUCCESS, peer).unwrap();
    }
    assert_eq!(received, payload);

    // Completion echo: prefix, then the zero-padded command buffer.
    guest.send_to(MSG_ACK_PREFIX, peer).unwrap();
    let mut echo = [0u8; MAX_COMMAND_LEN];
    echo[..command.len()].copy_from_slice(&command);
    guest.send_to(&echo, peer).unwrap();

    let echoed = client_thread.join().unwrap().unwrap();
    assert!(echoed.starts_with("impo guest-destination"), "unexpected echo: {echoed}");

    // No unpaired tokens: the wire is silent after the echo.
    guest.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    assert!(guest.recv_from(&mut buf).is_err());

    fs::remove_file(src).unwrap();
}

#[test]
fn verify_import_abort_mid_transfer() {
    // The guest fails its second chunk write; the client must stop sending and report the abort.
    let guest = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = guest.local_addr().unwrap();

    let src = temp_path("abort-src.bin");
    fs::write(&src, patterned_bytes(20000)).unwrap();

    let client_src = src.clone();
    let client_thread = thread::spawn(move || {
        let client = AgentClient::connect(addr).unwrap();
        client.import(&client_src, "guest-destination")
    });

    let mut buf = vec![0u8; 16384];

    let (_, peer) = guest.recv_from(&mut buf).unwrap();
    guest.send_to(MSG_SUCCESS, peer).unwrap();
    let _ = guest.recv_from(&mut buf).unwrap(); // size prefix

    // First chunk is written fine.
    let _ = guest.recv_from(&mut buf).unwrap(); // source-read ack
    let _ = guest.recv_from(&mut buf).unwrap(); // payload
    guest.send_to(MSG_SUCCESS, peer).unwrap();

    // Second chunk hits a write failure.
    let _ = guest.recv_from(&mut buf).unwrap();
    let _ = guest.recv_from(&mut buf).unwrap();
    guest.send_to(MSG_CMDFAIL, peer).unwrap();

    assert!(client_thread.join().unwrap().is_err());

    // CMDFAIL is terminal: nothing further arrives from the client.
    guest.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    assert!(guest.recv_from(&mut buf).is_err());

    fs::remove_file(src).unwrap();
}

#[test]
fn verify_export_round_trip() {
    let (addr, _log) = start_server();
    let client = AgentClient::connect(addr).unwrap();

    let payload = patterned_bytes(10000);
    let src = temp_path("export-src.bin");
    let dst = temp_path("export-dst.bin");
    fs::write(&src, &payload).unwrap();

    let echoed = client.export(src.to_str().unwrap(), &dst).unwrap();
    assert!(echoed.starts_with("expo "), "unexpected echo: {echoed}");

    assert_eq!(fs::read(&dst).unwrap(), payload);

    fs::remove_file(src).unwrap();
    fs::remove_file(dst).unwrap();
}

#[test]
fn verify_export_missing_source_fails() {
    let (addr, _log) = start_server();
    let client = AgentClient::connect(addr).unwrap();

    let dst = temp_path("export-missing-dst.bin");
    assert!(client.export("/nonexistent/spyglass-source", &dst).is_err());

    // The destination was never created: the guest aborted before any payload moved.
    assert!(!dst.exists());
}

#[test]
fn verify_logfile_export() {
    let (addr, _log) = start_server();
    let client = AgentClient::connect(addr).unwrap();

    let dst = temp_path("agent-log-copy.txt");
    let echoed = client.logfile(&dst).unwrap();
    assert!(echoed.starts_with("logf "), "unexpected echo: {echoed}");

    let contents = fs::read_to_string(&dst).unwrap();
    assert!(contents.contains("Welcome to the Spyglass agent"));
    assert!(contents.contains("\r\n"));

    fs::remove_file(dst).unwrap();
}

#[cfg(unix)]
#[test]
fn verify_exec_streams_output() {
    let (addr, _log) = start_server();
    let client = AgentClient::connect(addr).unwrap();

    let mut output = Vec::new();
    let echoed = client.execute("printf abcdef", None, &mut output).unwrap();

    assert_eq!(output, b"abcdef");
    assert!(echoed.starts_with("exec printf"), "unexpected echo: {echoed}");
}

#[cfg(unix)]
#[test]
fn verify_exec_wire_frames() {
    // Raw-wire view of an exec: EXEC_READY, zero or more (length, payload) frames, and a
    // zero-length end-of-stream marker strictly after the last payload byte.
    let (addr, _log) = start_server();

    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.connect(addr).unwrap();

    sock.send(b"exec printf abcdef\0").unwrap();

    let mut buf = vec![0u8; 8192];

    let len = sock.recv(&mut buf).unwrap();
    assert_eq!(&buf[..len], MSG_EXEC_READY);

    let mut collected = Vec::new();
    loop {
        let len = sock.recv(&mut buf).unwrap();
        assert_eq!(len, 4, "frame length header must be 4 bytes");

        let frame_len = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
        if frame_len == 0 {
            break;
        }

        let len = sock.recv(&mut buf).unwrap();
        assert_eq!(len, frame_len, "frame payload must match its header");
        collected.extend_from_slice(&buf[..len]);
    }

    assert_eq!(collected, b"abcdef");

    // Completion echo follows the marker.
    let len = sock.recv(&mut buf).unwrap();
    assert_eq!(&buf[..len], MSG_ACK_PREFIX);
    let len = sock.recv(&mut buf).unwrap();
    assert_eq!(len, MAX_COMMAND_LEN);
    assert!(buf[..len].starts_with(b"exec printf abcdef"));
}

#[cfg(unix)]
#[test]
fn verify_exec_forwards_stdin() {
    let (addr, _log) = start_server();
    let client = AgentClient::connect(addr).unwrap();

    // `head -c 6` exits after reading six bytes, so it terminates without a stdin EOF.
    let stdin = std::io::Cursor::new(b"hello\n".to_vec());
    let mut output = Vec::new();
    client.execute("head -c 6", Some(Box::new(stdin)), &mut output).unwrap();

    assert_eq!(output, b"hello\n");
}

#[cfg(unix)]
#[test]
fn verify_exec_spawn_failure_reports_cmdfail() {
    let (addr, _log) = start_server();
    let client = AgentClient::connect(addr).unwrap();

    let mut output = Vec::new();
    assert!(client.execute("/nonexistent/spyglass-prog", None, &mut output).is_err());
    assert!(output.is_empty());
}

#[cfg(unix)]
#[test]
fn verify_invoke_detached() {
    let (addr, _log) = start_server();
    let client = AgentClient::connect(addr).unwrap();

    let echoed = client.invoke("true").unwrap();
    assert!(echoed.starts_with("invo true"), "unexpected echo: {echoed}");

    assert!(client.invoke("/nonexistent/spyglass-prog").is_err());
}

#[cfg(unix)]
#[test]
fn verify_sync_round_trip() {
    let (addr, _log) = start_server();
    let client = AgentClient::connect(addr).unwrap();

    let echoed = client.sync_guest().unwrap();
    assert!(echoed.starts_with("sync"), "unexpected echo: {echoed}");
}

#[test]
fn verify_unknown_command_keeps_session_alive() {
    let (addr, _log) = start_server();

    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.connect(addr).unwrap();
    sock.send(b"zzzz hello\0").unwrap();

    let mut buf = [0u8; MAX_COMMAND_LEN];
    let len = sock.recv(&mut buf).unwrap();
    assert!(buf[..len].starts_with(b"ERROR"));

    // The session still serves: a small import from a fresh peer succeeds.
    let payload = patterned_bytes(100);
    let src = temp_path("alive-src.bin");
    let dst = temp_path("alive-dst.bin");
    fs::write(&src, &payload).unwrap();

    let client = AgentClient::connect(addr).unwrap();
    client.import(&src, dst.to_str().unwrap()).unwrap();
    assert_eq!(fs::read(&dst).unwrap(), payload);

    fs::remove_file(src).unwrap();
    fs::remove_file(dst).unwrap();
}

#[cfg(unix)]
#[test]
fn verify_sequential_commands_are_not_interleaved() {
    // Two commands sent back to back: every datagram of the first action precedes every
    // datagram of the second.
    let (addr, _log) = start_server();

    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.connect(addr).unwrap();

    sock.send(b"invo true\0").unwrap();
    sock.send(b"invo /bin/true\0").unwrap();

    let mut buf = [0u8; MAX_COMMAND_LEN];

    for expected in ["invo true", "invo /bin/true"] {
        let len = sock.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], MSG_SUCCESS);

        let len = sock.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], MSG_ACK_PREFIX);

        let len = sock.recv(&mut buf).unwrap();
        assert_eq!(len, MAX_COMMAND_LEN);
        assert!(buf.starts_with(expected.as_bytes()), "out-of-order echo for {expected}");
    }
}
