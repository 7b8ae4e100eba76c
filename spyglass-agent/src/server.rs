// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `server` module is the guest-side peer: one datagram socket, one session, one command in
//! flight at a time.
//!
//! The session value owns the socket, the agent log, and the state machine; command handlers
//! borrow it exclusively and run to completion before the next receive, so an action is never
//! interleaved with another. Per-command failures return the session to `Ready`; transport and
//! resource failures are fatal and end the serve loop.

use std::fs::File;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use spyglass_core::errors::{protocol_error, Error, Result};

use crate::exec;
use crate::guestlog::AgentLog;
use crate::proto::{
    Command, CommandTag, Link, CHUNK_LEN, MAX_COMMAND_LEN, MSG_ACK_PREFIX, MSG_CMDFAIL,
    MSG_SUCCESS,
};
use crate::transfer;

/// The lifecycle of one agent session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// The socket is not bound yet.
    Uninit,
    /// Waiting for a command.
    Ready,
    /// A command handler holds the floor.
    Busy(CommandTag),
    /// An unrecoverable error ended the session.
    Fatal,
}

struct Session {
    socket: UdpSocket,
    log: AgentLog,
    state: SessionState,
}

/// The guest-side agent server.
pub struct AgentServer {
    session: Session,
}

impl AgentServer {
    /// Bind the session socket and create the agent log.
    ///
    /// On success the session is `Ready`. A bind or log creation failure is returned and no
    /// session exists.
    pub fn bind(addr: impl ToSocketAddrs, log_path: Option<PathBuf>) -> Result<AgentServer> {
        let socket = UdpSocket::bind(addr).map_err(Error::TransportError)?;
        let log = AgentLog::create(log_path)?;

        let mut session = Session { socket, log, state: SessionState::Uninit };

        session.log.write_line("================ Welcome to the Spyglass agent ================")?;
        session.state = SessionState::Ready;

        info!("agent: serving on {}", session.socket.local_addr().map_err(Error::TransportError)?);

        Ok(AgentServer { session })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.session.socket.local_addr().map_err(Error::TransportError)
    }

    /// The path of the agent log file.
    pub fn log_path(&self) -> &Path {
        self.session.log.path()
    }

    /// The current session state.
    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Serve commands until an unrecoverable error.
    pub fn run(&mut self) -> Result<()> {
        let result = self.session.serve();

        if let Err(ref err) = result {
            self.session.state = SessionState::Fatal;
            error!("agent: session ended: {}", err);
        }

        result
    }
}

impl Session {
    fn serve(&mut self) -> Result<()> {
        loop {
            let mut buf = [0u8; MAX_COMMAND_LEN];

            let (len, peer) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                // Receive timeouts can linger on the shared socket after an exec handler.
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(err) => {
                    let _ = self.log.write_line("[SYSTEM] session socket lost");
                    return Err(Error::TransportError(err));
                }
            };

            self.log.write_line(&format!(
                "Bytes received: {:#010x}, Received message: {}",
                len,
                String::from_utf8_lossy(&buf[..len]).trim_end_matches('\0')
            ))?;

            let command = match Command::parse(&buf[..len]) {
                Ok(command) => command,
                Err(err) => {
                    warn!("agent: {}", err);
                    self.log.write_line("[COMMAND ERROR] unknown or malformed command")?;
                    let _ = Link::to_peer(&self.socket, peer).send(b"ERROR: unknown command");
                    continue;
                }
            };

            debug!("agent: state {:?} -> {:?}", self.state, SessionState::Busy(command.tag));
            self.state = SessionState::Busy(command.tag);

            let outcome = self.dispatch(peer, &command);

            self.state = SessionState::Ready;

            match outcome {
                Ok(()) => {
                    // Echo the zero-padded command buffer back as the completion status.
                    let mut echo = [0u8; MAX_COMMAND_LEN];
                    echo[..len].copy_from_slice(&buf[..len]);

                    let link = Link::to_peer(&self.socket, peer);
                    link.send(MSG_ACK_PREFIX)?;
                    link.send(&echo)?;

                    self.log.write_line(&format!("'{}' command completed", command.tag))?;
                }
                Err(err @ (Error::TransportError(_) | Error::ResourceError(_))) => {
                    let _ = self.log.write_line("[SYSTEM] unrecoverable error, session closing");
                    return Err(err);
                }
                Err(err) => {
                    warn!("agent: '{}' command failed: {}", command.tag, err);
                    self.log.write_line(&format!("'{}' command failed: {}", command.tag, err))?;
                }
            }
        }
    }

    fn dispatch(&mut self, peer: SocketAddr, command: &Command) -> Result<()> {
        match command.tag {
            CommandTag::Import => self.handle_import(peer, &command.argument),
            CommandTag::Export => self.handle_export(peer, &command.argument),
            CommandTag::LogFile => self.handle_logfile(peer),
            CommandTag::Execute => self.handle_execute(peer, &command.argument),
            CommandTag::Invoke => self.handle_invoke(peer, &command.argument),
            CommandTag::Sync => self.handle_sync(peer),
        }
    }

    /// `impo <dst>`: receive a host file into the guest.
    fn handle_import(&mut self, peer: SocketAddr, dst: &str) -> Result<()> {
        let link = Link::to_peer(&self.socket, peer);

        self.log.write_line(&format!("import destination: [{}]", dst))?;

        let mut file = match File::create(dst) {
            Ok(file) => {
                link.send(MSG_SUCCESS)?;
                file
            }
            Err(err) => {
                let _ = link.send(MSG_CMDFAIL);
                return Err(Error::IoError(err));
            }
        };

        let mut size_buf = [0u8; 8];
        if link.recv(&mut size_buf)? != 8 {
            return protocol_error("agent: malformed transfer size prefix");
        }
        let total = u64::from_le_bytes(size_buf);

        self.log.write_line(&format!("total file size: {} bytes", total))?;

        transfer::recv_sized(&link, &mut file, total)?;

        if total % CHUNK_LEN as u64 != 0 {
            // Re-assert the final length after an unpadded tail write.
            file.set_len(total).map_err(Error::IoError)?;
        }

        self.log.write_line(&format!("total stored size: {} bytes", total))?;

        Ok(())
    }

    /// `expo <src>`: send a guest file to the host.
    fn handle_export(&mut self, peer: SocketAddr, src: &str) -> Result<()> {
        let link = Link::to_peer(&self.socket, peer);

        self.log.write_line(&format!("export source: [{}]", src))?;

        let opened = File::open(src).and_then(|file| {
            let total = file.metadata()?.len();
            Ok((file, total))
        });

        let (mut file, total) = match opened {
            Ok(opened) => {
                link.send(MSG_SUCCESS)?;
                opened
            }
            Err(err) => {
                let _ = link.send(MSG_CMDFAIL);
                return Err(Error::IoError(err));
            }
        };

        self.log.write_line(&format!("\"{}\" has {} bytes", src, total))?;

        link.send(&total.to_le_bytes())?;

        // The host acknowledges opening its destination before any payload moves.
        link.recv_ack()?;

        transfer::send_sized(&link, &mut file, total)?;

        self.log.write_line(&format!("total sent size: {} bytes", total))?;

        Ok(())
    }

    /// `logf`: export the live agent log over an independent read cursor.
    fn handle_logfile(&mut self, peer: SocketAddr) -> Result<()> {
        self.log.write_line("export of the agent log requested")?;

        let link = Link::to_peer(&self.socket, peer);

        let opened = self.log.reader().and_then(|file| {
            let total = file.metadata()?.len();
            Ok((file, total))
        });

        let (mut reader, total) = match opened {
            Ok(opened) => {
                link.send(MSG_SUCCESS)?;
                opened
            }
            Err(err) => {
                let _ = link.send(MSG_CMDFAIL);
                return Err(Error::IoError(err));
            }
        };

        link.send(&total.to_le_bytes())?;
        link.recv_ack()?;

        transfer::send_sized(&link, &mut reader, total)?;

        Ok(())
    }

    /// `exec <cmdline>`: run a child with streamed stdio.
    fn handle_execute(&mut self, peer: SocketAddr, cmdline: &str) -> Result<()> {
        self.log.write_line(&format!("executing: [{}]", cmdline))?;
        exec::stream_child(&self.socket, peer, cmdline)
    }

    /// `invo <cmdline>`: launch a child, detached.
    fn handle_invoke(&mut self, peer: SocketAddr, cmdline: &str) -> Result<()> {
        let link = Link::to_peer(&self.socket, peer);

        self.log.write_line(&format!("invoking: [{}]", cmdline))?;

        match exec::spawn_detached(cmdline) {
            Ok(()) => link.send(MSG_SUCCESS),
            Err(err) => {
                let _ = link.send(MSG_CMDFAIL);
                Err(err)
            }
        }
    }

    /// `sync`: flush guest filesystem caches, acknowledging the open and flush stages.
    fn handle_sync(&mut self, peer: SocketAddr) -> Result<()> {
        let link = Link::to_peer(&self.socket, peer);

        self.log.write_line("flushing filesystem caches")?;

        match filesystem_root() {
            Ok(_root) => link.send(MSG_SUCCESS)?,
            Err(err) => {
                let _ = link.send(MSG_CMDFAIL);
                return Err(Error::IoError(err));
            }
        }

        match flush_caches() {
            Ok(()) => link.send(MSG_SUCCESS),
            Err(err) => {
                let _ = link.send(MSG_CMDFAIL);
                Err(Error::IoError(err))
            }
        }
    }
}

#[cfg(unix)]
fn filesystem_root() -> std::io::Result<File> {
    File::open("/")
}

#[cfg(not(unix))]
fn filesystem_root() -> std::io::Result<File> {
    Err(std::io::Error::new(ErrorKind::Unsupported, "volume flush is not supported here"))
}

#[cfg(unix)]
fn flush_caches() -> std::io::Result<()> {
    let status = std::process::Command::new("sync").status()?;
    if status.success() {
        Ok(())
    }
    else {
        Err(std::io::Error::other("the sync utility reported failure"))
    }
}

#[cfg(not(unix))]
fn flush_caches() -> std::io::Result<()> {
    Err(std::io::Error::new(ErrorKind::Unsupported, "volume flush is not supported here"))
}
