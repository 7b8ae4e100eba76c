// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `client` module is the host-side peer.
//!
//! The client is strictly synchronous: it issues one command, performs that command's paired
//! transfer direction, and finishes by reading the server's acknowledgement echo, which doubles
//! as the operator's one-line status. The 100 MiB transfer policy is enforced here, before any
//! wire traffic where the size is known up front.

use std::fs::File;
use std::io::{Read, Write};
use std::net::{ToSocketAddrs, UdpSocket};
use std::path::Path;
use std::thread;

use log::{debug, info};

use spyglass_core::errors::{limit_error, protocol_error, resource_error, Error, Result};

use crate::proto::{
    Command, CommandTag, Link, CHUNK_LEN, MAX_COMMAND_LEN, MAX_TRANSFER_LEN, MSG_ACK_PREFIX,
    MSG_CMDFAIL, MSG_EXEC_READY, MSG_SUCCESS,
};
use crate::transfer;

/// The host-side agent client.
pub struct AgentClient {
    socket: UdpSocket,
}

impl AgentClient {
    /// Bind a fresh local port and connect it to the agent.
    ///
    /// The local port is OS-assigned from the ephemeral range, which satisfies the
    /// unprivileged-port requirement of session setup.
    pub fn connect(agent_addr: impl ToSocketAddrs) -> Result<AgentClient> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(Error::TransportError)?;
        socket.connect(agent_addr).map_err(Error::TransportError)?;

        let local = socket.local_addr().map_err(Error::TransportError)?;
        debug!("agent: client bound to {}", local);

        Ok(AgentClient { socket })
    }

    fn link(&self) -> Link<'_> {
        Link::connected(&self.socket)
    }

    fn send_command(&self, tag: CommandTag, argument: &str) -> Result<()> {
        let datagram = Command::new(tag, argument).encode()?;
        self.link().send(&datagram)
    }

    /// Read the server's completion echo: the fixed prefix datagram, then the zero-padded
    /// command buffer. The echoed command line is the operator's status line.
    fn read_echo(&self) -> Result<String> {
        let link = self.link();
        let mut buf = [0u8; MAX_COMMAND_LEN];

        let len = link.recv(&mut buf)?;
        if &buf[..len] != MSG_ACK_PREFIX {
            return protocol_error("agent: missing acknowledgement echo prefix");
        }

        let len = link.recv(&mut buf)?;
        let echoed = &buf[..len];
        let echoed = match echoed.iter().position(|&b| b == 0) {
            Some(nul) => &echoed[..nul],
            None => echoed,
        };

        Ok(String::from_utf8_lossy(echoed).into_owned())
    }

    /// Receive a sized stream from the guest into a host file: used by `expo` and `logf`.
    fn recv_file(&self, dst: &Path) -> Result<()> {
        let link = self.link();

        // The guest acknowledges opening and sizing its source, then sends the size.
        link.recv_ack()?;

        let mut size_buf = [0u8; 8];
        if link.recv(&mut size_buf)? != 8 {
            return protocol_error("agent: malformed transfer size prefix");
        }
        let total = u64::from_le_bytes(size_buf);

        if total > MAX_TRANSFER_LEN {
            let _ = link.send(MSG_CMDFAIL);
            return limit_error("agent: export exceeds the 100 MiB transfer limit");
        }

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

        transfer::recv_sized(&link, &mut file, total)
    }

    /// Import a host file into the guest (`impo`).
    pub fn import(&self, src: &Path, dst: &str) -> Result<String> {
        let mut file = File::open(src).map_err(Error::IoError)?;
        let total = file.metadata().map_err(Error::IoError)?.len();

        // Policy gate: reported to the operator, no wire traffic issued.
        if total > MAX_TRANSFER_LEN {
            return limit_error("agent: import exceeds the 100 MiB transfer limit");
        }

        info!("agent: importing {} ({} bytes) to guest [{}]", src.display(), total, dst);

        self.send_command(CommandTag::Import, dst)?;

        let link = self.link();
        link.recv_ack()?;
        link.send(&total.to_le_bytes())?;

        transfer::send_sized(&link, &mut file, total)?;

        self.read_echo()
    }

    /// Export a guest file to the host (`expo`).
    pub fn export(&self, src: &str, dst: &Path) -> Result<String> {
        info!("agent: exporting guest [{}] to {}", src, dst.display());

        self.send_command(CommandTag::Export, src)?;
        self.recv_file(dst)?;
        self.read_echo()
    }

    /// Copy the guest agent log to the host (`logf`).
    pub fn logfile(&self, dst: &Path) -> Result<String> {
        info!("agent: exporting the guest agent log to {}", dst.display());

        self.send_command(CommandTag::LogFile, &dst.display().to_string())?;
        self.recv_file(dst)?;
        self.read_echo()
    }

    /// Run a command line in the guest with streamed stdio (`exec`).
    ///
    /// Output frames are written to `output` as they arrive, until the zero-length end-of-stream
    /// marker. When `stdin` is given, a detached forwarder thread sends its contents to the
    /// guest as child input; the thread ends with its reader.
    pub fn execute(
        &self,
        cmdline: &str,
        stdin: Option<Box<dyn Read + Send + 'static>>,
        output: &mut dyn Write,
    ) -> Result<String> {
        info!("agent: executing [{}] in the guest", cmdline);

        self.send_command(CommandTag::Execute, cmdline)?;

        let link = self.link();
        let mut buf = [0u8; CHUNK_LEN];

        let len = link.recv(&mut buf)?;
        if &buf[..len] == MSG_CMDFAIL {
            return protocol_error("agent: guest failed to spawn the command");
        }
        if &buf[..len] != MSG_EXEC_READY {
            return protocol_error("agent: unexpected token in place of EXEC_READY");
        }

        if let Some(mut reader) = stdin {
            let socket = match self.socket.try_clone() {
                Ok(socket) => socket,
                Err(_) => return resource_error("agent: unable to clone the session socket"),
            };

            let forwarder = thread::Builder::new().name("agent-exec-stdin".to_string()).spawn(
                move || {
                    let mut chunk = [0u8; MAX_COMMAND_LEN];
                    loop {
                        match reader.read(&mut chunk) {
                            Ok(0) | Err(_) => break,
                            Ok(len) => {
                                if socket.send(&chunk[..len]).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                },
            );

            if forwarder.is_err() {
                return resource_error("agent: unable to spawn the stdin forwarder");
            }
        }

        loop {
            let len = link.recv(&mut buf)?;
            if len != 4 {
                return protocol_error("agent: malformed output frame length");
            }

            let frame_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            if frame_len == 0 {
                break;
            }

            let len = link.recv(&mut buf)?;
            if len != frame_len {
                return protocol_error("agent: output frame length mismatch");
            }

            output.write_all(&buf[..len]).map_err(Error::IoError)?;
        }

        self.read_echo()
    }

    /// Launch a command line in the guest, detached (`invo`).
    pub fn invoke(&self, cmdline: &str) -> Result<String> {
        info!("agent: invoking [{}] in the guest", cmdline);

        self.send_command(CommandTag::Invoke, cmdline)?;
        self.link().recv_ack()?;
        self.read_echo()
    }

    /// Ask the guest to flush its filesystem caches (`sync`).
    pub fn sync_guest(&self) -> Result<String> {
        info!("agent: requesting a guest filesystem flush");

        self.send_command(CommandTag::Sync, "")?;

        let link = self.link();
        link.recv_ack()?;
        link.recv_ack()?;

        self.read_echo()
    }
}
