// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host/guest agent command transport.
//!
//! The agent protocol runs over one datagram socket per session. The guest binds the socket and
//! serves commands; the host is the synchronous peer that issues them. A command datagram is a
//! 4-byte ASCII tag, a space, and a NUL-terminated argument in at most 256 bytes. Bulk payloads
//! move in 8,192-byte chunks, each bracketed by a source-read acknowledgement in front and a
//! destination-write acknowledgement behind, so either peer can abort on a local I/O failure.
//! Child process output is framed as a 4-byte little-endian length followed by that many bytes,
//! with a zero length marking end-of-stream.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Spyglass crates. Please see the workspace manifest for
// their justification.
#![allow(clippy::comparison_chain)]
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

pub mod client;
pub mod proto;
pub mod server;
pub mod transfer;

mod exec;
mod guestlog;
