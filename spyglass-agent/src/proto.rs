// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `proto` module defines the wire elements of the agent protocol: command framing, the
//! fixed acknowledgement tokens, and the `Link` datagram endpoint shared by both peers.

use std::fmt;
use std::net::{SocketAddr, UdpSocket};

use log::debug;

use spyglass_core::errors::{protocol_error, Error, Result};

/// Default UDP port the guest agent serves on.
pub const DEFAULT_AGENT_PORT: u16 = 8888;

/// Maximum length of a command datagram.
pub const MAX_COMMAND_LEN: usize = 256;

/// Length of one bulk transfer chunk.
pub const CHUNK_LEN: usize = 8192;

/// Host-side policy limit on a single bulk transfer.
pub const MAX_TRANSFER_LEN: u64 = 100 * 1024 * 1024;

/// Acknowledgement token: the sending peer completed its half of a step.
pub const MSG_SUCCESS: &[u8] = b"SUCCESS";

/// Acknowledgement token: the sending peer failed its half of a step and aborted.
pub const MSG_CMDFAIL: &[u8] = b"CMDFAIL";

/// Token sent by the guest once a child process has been spawned with redirected stdio.
pub const MSG_EXEC_READY: &[u8] = b"EXEC_READY";

/// Prefix of the command echo the server sends after a successful command.
pub const MSG_ACK_PREFIX: &[u8] = b"System Receive : ";

/// `CommandTag` identifies one agent action. The set is closed; anything else on the wire is a
/// protocol error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandTag {
    /// Run a command line in the guest with streamed stdio.
    Execute,
    /// Launch a command line in the guest, detached.
    Invoke,
    /// Send a guest file to the host.
    Export,
    /// Receive a host file into the guest.
    Import,
    /// Send the guest agent log to the host.
    LogFile,
    /// Flush guest filesystem caches.
    Sync,
}

impl CommandTag {
    /// The 4-byte ASCII tag of this command.
    pub fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            CommandTag::Execute => b"exec",
            CommandTag::Invoke => b"invo",
            CommandTag::Export => b"expo",
            CommandTag::Import => b"impo",
            CommandTag::LogFile => b"logf",
            CommandTag::Sync => b"sync",
        }
    }

    fn from_bytes(tag: &[u8]) -> Option<CommandTag> {
        match tag {
            b"exec" => Some(CommandTag::Execute),
            b"invo" => Some(CommandTag::Invoke),
            b"expo" => Some(CommandTag::Export),
            b"impo" => Some(CommandTag::Import),
            b"logf" => Some(CommandTag::LogFile),
            b"sync" => Some(CommandTag::Sync),
            _ => None,
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(std::str::from_utf8(self.as_bytes()).unwrap())
    }
}

/// One parsed command datagram: a tag and its argument text.
#[derive(Debug)]
pub struct Command {
    pub tag: CommandTag,
    pub argument: String,
}

impl Command {
    pub fn new(tag: CommandTag, argument: &str) -> Command {
        Command { tag, argument: argument.to_string() }
    }

    /// Parse a received datagram.
    ///
    /// A valid command is 5 to 256 bytes: a known 4-byte tag, a space, and an argument running
    /// to the first NUL or the end of the datagram.
    pub fn parse(datagram: &[u8]) -> Result<Command> {
        if datagram.len() < 5 || datagram.len() > MAX_COMMAND_LEN {
            return protocol_error("agent: command datagram length out of bounds");
        }

        let tag = match CommandTag::from_bytes(&datagram[..4]) {
            Some(tag) => tag,
            None => return protocol_error("agent: unknown command tag"),
        };

        if datagram[4] != b' ' {
            return protocol_error("agent: malformed command separator");
        }

        let arg = &datagram[5..];
        let arg = match arg.iter().position(|&b| b == 0) {
            Some(nul) => &arg[..nul],
            None => arg,
        };

        let argument = match std::str::from_utf8(arg) {
            Ok(text) => text.to_string(),
            Err(_) => return protocol_error("agent: command argument is not valid text"),
        };

        Ok(Command { tag, argument })
    }

    /// Encode the command into a datagram: tag, space, argument, NUL.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if 4 + 1 + self.argument.len() + 1 > MAX_COMMAND_LEN {
            return protocol_error("agent: command argument too long");
        }

        let mut datagram = Vec::with_capacity(6 + self.argument.len());
        datagram.extend_from_slice(self.tag.as_bytes());
        datagram.push(b' ');
        datagram.extend_from_slice(self.argument.as_bytes());
        datagram.push(0);

        Ok(datagram)
    }
}

/// `Link` is one peer's view of the session socket.
///
/// The host side runs over a connected socket; the guest side keeps its socket unconnected and
/// pins the link to the address the in-flight command arrived from. Datagrams from any other
/// address are dropped while a pinned link holds the floor.
pub struct Link<'a> {
    socket: &'a UdpSocket,
    peer: Option<SocketAddr>,
}

impl<'a> Link<'a> {
    /// A link over a connected socket.
    pub fn connected(socket: &'a UdpSocket) -> Link<'a> {
        Link { socket, peer: None }
    }

    /// A link over an unconnected socket, pinned to one peer.
    pub fn to_peer(socket: &'a UdpSocket, peer: SocketAddr) -> Link<'a> {
        Link { socket, peer: Some(peer) }
    }

    /// Send one datagram to the peer.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        let sent = match self.peer {
            Some(peer) => self.socket.send_to(payload, peer),
            None => self.socket.send(payload),
        };

        match sent {
            Ok(len) if len == payload.len() => Ok(()),
            Ok(_) => protocol_error("agent: short datagram send"),
            Err(err) => Err(Error::TransportError(err)),
        }
    }

    /// Receive one datagram from the peer into `buf`, returning its length.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let (len, from) = match self.socket.recv_from(buf) {
                Ok(received) => received,
                Err(err) => return Err(Error::TransportError(err)),
            };

            match self.peer {
                Some(peer) if from != peer => {
                    debug!("agent: dropping stray datagram from {}", from);
                }
                _ => return Ok(len),
            }
        }
    }

    /// Receive one acknowledgement token.
    ///
    /// `SUCCESS` continues the exchange. `CMDFAIL` is the peer aborting; anything else is a
    /// protocol violation. Both surface as errors to unwind the in-flight action.
    pub fn recv_ack(&self) -> Result<()> {
        let mut buf = [0u8; 16];
        let len = self.recv(&mut buf)?;

        if &buf[..len] == MSG_SUCCESS {
            Ok(())
        }
        else if &buf[..len] == MSG_CMDFAIL {
            protocol_error("agent: peer reported failure and aborted")
        }
        else {
            protocol_error("agent: unexpected token in place of an acknowledgement")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Command, CommandTag, MAX_COMMAND_LEN};

    #[test]
    fn verify_command_parse() {
        let cmd = Command::parse(b"impo C:\\out\\sample.bin\0").unwrap();
        assert_eq!(cmd.tag, CommandTag::Import);
        assert_eq!(cmd.argument, "C:\\out\\sample.bin");

        // The argument may also run to the end of the datagram without a NUL.
        let cmd = Command::parse(b"exec notepad.exe").unwrap();
        assert_eq!(cmd.tag, CommandTag::Execute);
        assert_eq!(cmd.argument, "notepad.exe");

        // Empty argument.
        let cmd = Command::parse(b"sync \0").unwrap();
        assert_eq!(cmd.tag, CommandTag::Sync);
        assert_eq!(cmd.argument, "");
    }

    #[test]
    fn verify_command_parse_rejects_malformed() {
        assert!(Command::parse(b"").is_err());
        assert!(Command::parse(b"impo").is_err());
        assert!(Command::parse(b"zzzz target\0").is_err());
        assert!(Command::parse(b"impo_target\0").is_err());

        let oversize = vec![b'a'; MAX_COMMAND_LEN + 1];
        assert!(Command::parse(&oversize).is_err());
    }

    #[test]
    fn verify_command_encode_round_trip() {
        let encoded = Command::new(CommandTag::Export, "/var/log/syslog").encode().unwrap();
        assert_eq!(&encoded[..5], b"expo ");
        assert_eq!(*encoded.last().unwrap(), 0);

        let cmd = Command::parse(&encoded).unwrap();
        assert_eq!(cmd.tag, CommandTag::Export);
        assert_eq!(cmd.argument, "/var/log/syslog");
    }

    #[test]
    fn verify_command_encode_rejects_oversize() {
        let argument = "a".repeat(MAX_COMMAND_LEN);
        assert!(Command::new(CommandTag::Invoke, &argument).encode().is_err());
    }
}
