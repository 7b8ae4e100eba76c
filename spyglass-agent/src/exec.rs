// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `exec` module runs child processes in the guest.
//!
//! A streamed execution wires the child's stdout and stderr to one anonymous pipe (the stderr
//! handle is a clone of the stdout write end, so both interleave through a single read end) and
//! its stdin to a forwarder thread fed from the session socket. Output is framed to the host as
//! a 4-byte little-endian length plus payload; a zero length marks end-of-stream.

use std::io::{pipe, ErrorKind, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use spyglass_core::errors::{protocol_error, resource_error, Error, Result};

use crate::proto::{Link, MAX_COMMAND_LEN, MSG_CMDFAIL, MSG_EXEC_READY};

/// Size of one read from the child's output pipe, and so the largest output frame.
const OUTPUT_BUF_LEN: usize = 4096;

/// How often the stdin forwarder wakes up to check for shutdown.
const STDIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run `cmdline` with redirected stdio, streaming its output to the peer.
///
/// Sends `EXEC_READY` once the child is spawned, or `CMDFAIL` if it cannot be. The forwarder
/// thread owns a clone of the session socket; the receive timeout it needs is reset on the
/// shared socket before returning.
pub(crate) fn stream_child(socket: &UdpSocket, peer: SocketAddr, cmdline: &str) -> Result<()> {
    let link = Link::to_peer(socket, peer);

    let mut parts = cmdline.split_whitespace();
    let program = match parts.next() {
        Some(program) => program,
        None => {
            let _ = link.send(MSG_CMDFAIL);
            return protocol_error("agent: empty command line");
        }
    };

    let (mut child_output, output_writer) = match pipe() {
        Ok(ends) => ends,
        Err(_) => {
            let _ = link.send(MSG_CMDFAIL);
            return resource_error("agent: unable to create the child output pipe");
        }
    };

    let error_writer = match output_writer.try_clone() {
        Ok(writer) => writer,
        Err(_) => {
            let _ = link.send(MSG_CMDFAIL);
            return resource_error("agent: unable to clone the child output pipe");
        }
    };

    let mut child = match Command::new(program)
        .args(parts)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(output_writer))
        .stderr(Stdio::from(error_writer))
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            let _ = link.send(MSG_CMDFAIL);
            return Err(Error::IoError(err));
        }
    };

    let stdin = match child.stdin.take() {
        Some(stdin) => stdin,
        None => {
            let _ = link.send(MSG_CMDFAIL);
            return resource_error("agent: child spawned without a stdin handle");
        }
    };

    link.send(MSG_EXEC_READY)?;

    let stop = Arc::new(AtomicBool::new(false));

    let helper_socket = match socket.try_clone() {
        Ok(socket) => socket,
        Err(_) => return resource_error("agent: unable to clone the session socket"),
    };
    helper_socket.set_read_timeout(Some(STDIN_POLL_INTERVAL)).map_err(Error::TransportError)?;

    let helper = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("agent-exec-stdin".to_string())
            .spawn(move || forward_stdin(helper_socket, peer, stdin, stop))
    };
    let helper = match helper {
        Ok(helper) => helper,
        Err(_) => return resource_error("agent: unable to spawn the stdin forwarder"),
    };

    // Drain the merged output pipe into length-prefixed frames until the child closes it.
    let streamed = (|| -> Result<()> {
        let mut buf = [0u8; OUTPUT_BUF_LEN];
        loop {
            let len = child_output.read(&mut buf).map_err(Error::IoError)?;
            if len == 0 {
                return Ok(());
            }
            link.send(&(len as u32).to_le_bytes())?;
            link.send(&buf[..len])?;
        }
    })();

    // The zero-length frame strictly follows the last payload byte.
    let marker = link.send(&0u32.to_le_bytes());

    stop.store(true, Ordering::Release);
    if helper.join().is_err() {
        warn!("agent: stdin forwarder panicked");
    }

    // The forwarder's receive timeout lives on the shared socket; clear it for the mainloop.
    socket.set_read_timeout(None).map_err(Error::TransportError)?;

    match child.try_wait() {
        Ok(Some(status)) => debug!("agent: child exited with {}", status),
        Ok(None) => debug!("agent: child still running after closing its output"),
        Err(err) => warn!("agent: unable to reap child: {}", err),
    }

    streamed?;
    marker
}

/// Launch `cmdline` detached, with no stdio redirection and no wait.
pub(crate) fn spawn_detached(cmdline: &str) -> Result<()> {
    let mut parts = cmdline.split_whitespace();
    let program = match parts.next() {
        Some(program) => program,
        None => return protocol_error("agent: empty command line"),
    };

    Command::new(program)
        .args(parts)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(Error::IoError)?;

    Ok(())
}

/// Forward socket datagrams to the child's stdin.
///
/// Exits when the child closes its end (broken pipe), the peer shuts the socket (zero-length
/// read), or the stop flag is observed at a receive timeout.
fn forward_stdin(socket: UdpSocket, peer: SocketAddr, mut stdin: ChildStdin, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; MAX_COMMAND_LEN];

    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                if from != peer {
                    continue;
                }
                if len == 0 {
                    break;
                }
                if stdin.write_all(&buf[..len]).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::spawn_detached;

    #[test]
    fn verify_spawn_detached_rejects_empty_command() {
        assert!(spawn_detached("").is_err());
        assert!(spawn_detached("   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn verify_spawn_detached_launches() {
        assert!(spawn_detached("true").is_ok());
        assert!(spawn_detached("/nonexistent/program").is_err());
    }
}
