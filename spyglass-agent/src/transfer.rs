// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `transfer` module moves a known-size byte stream in one direction across the session
//! socket.
//!
//! The stream is cut into 8,192-byte chunks plus an unpadded tail of `total % 8192` bytes. Every
//! chunk is bracketed by two tokens: the sender's source-read acknowledgement in front of the
//! payload, and the receiver's destination-write acknowledgement behind it. A peer that fails a
//! local I/O step sends `CMDFAIL` in place of its acknowledgement and unwinds; the other peer
//! treats the token as a transfer abort. Bytes already written at the destination stay in place
//! on abort.

use std::io::{Read, Write};

use log::debug;

use spyglass_core::errors::{protocol_error, Error, Result};

use crate::proto::{Link, CHUNK_LEN, MSG_CMDFAIL, MSG_SUCCESS};

/// Send `total` bytes read from `source` across the link.
pub fn send_sized(link: &Link<'_>, source: &mut dyn Read, total: u64) -> Result<()> {
    let mut chunk = [0u8; CHUNK_LEN];

    let full_chunks = total / CHUNK_LEN as u64;
    let tail = (total % CHUNK_LEN as u64) as usize;

    debug!("agent: sending {} bytes ({} chunks, {} tail)", total, full_chunks, tail);

    for _ in 0..full_chunks {
        send_chunk(link, source, &mut chunk)?;
    }

    if tail != 0 {
        send_chunk(link, source, &mut chunk[..tail])?;
    }

    Ok(())
}

/// Receive `total` bytes from the link and write them to `dest`.
pub fn recv_sized(link: &Link<'_>, dest: &mut dyn Write, total: u64) -> Result<()> {
    let mut chunk = [0u8; CHUNK_LEN];

    let full_chunks = total / CHUNK_LEN as u64;
    let tail = (total % CHUNK_LEN as u64) as usize;

    debug!("agent: receiving {} bytes ({} chunks, {} tail)", total, full_chunks, tail);

    for _ in 0..full_chunks {
        recv_chunk(link, dest, &mut chunk, CHUNK_LEN)?;
    }

    if tail != 0 {
        recv_chunk(link, dest, &mut chunk, tail)?;
    }

    Ok(())
}

fn send_chunk(link: &Link<'_>, source: &mut dyn Read, chunk: &mut [u8]) -> Result<()> {
    if let Err(err) = source.read_exact(chunk) {
        // The source could not be read: abort in place of the source-read acknowledgement.
        let _ = link.send(MSG_CMDFAIL);
        return Err(Error::IoError(err));
    }

    link.send(MSG_SUCCESS)?;
    link.send(chunk)?;

    // The receiver's destination-write acknowledgement closes the chunk.
    link.recv_ack()
}

fn recv_chunk(link: &Link<'_>, dest: &mut dyn Write, chunk: &mut [u8], want: usize) -> Result<()> {
    link.recv_ack()?;

    let len = link.recv(chunk)?;
    if len != want {
        return protocol_error("agent: transfer chunk length does not match the size prefix");
    }

    if let Err(err) = dest.write_all(&chunk[..want]) {
        let _ = link.send(MSG_CMDFAIL);
        return Err(Error::IoError(err));
    }

    link.send(MSG_SUCCESS)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::UdpSocket;
    use std::thread;

    use super::{recv_sized, send_sized};
    use crate::proto::Link;

    fn socket_pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        a.connect(b.local_addr().unwrap()).unwrap();
        b.connect(a.local_addr().unwrap()).unwrap();
        (a, b)
    }

    #[test]
    fn verify_transfer_round_trip() {
        let (sender, receiver) = socket_pair();

        // Two full chunks and a one-byte tail.
        let payload: Vec<u8> = (0..16385u32).map(|i| i as u8).collect();
        let total = payload.len() as u64;

        let producer = thread::spawn(move || {
            let link = Link::connected(&sender);
            send_sized(&link, &mut Cursor::new(payload), total).unwrap();
        });

        let mut received = Vec::new();
        let link = Link::connected(&receiver);
        recv_sized(&link, &mut received, total).unwrap();

        producer.join().unwrap();

        assert_eq!(received.len(), 16385);
        assert!(received.iter().enumerate().all(|(i, &b)| b == i as u8));
    }

    #[test]
    fn verify_transfer_sender_abort() {
        let (sender, receiver) = socket_pair();

        // The source claims more bytes than it holds, so the sender aborts at the second chunk.
        let payload = vec![0u8; 8192];

        let producer = thread::spawn(move || {
            let link = Link::connected(&sender);
            assert!(send_sized(&link, &mut Cursor::new(payload), 16384).is_err());
        });

        let mut received = Vec::new();
        let link = Link::connected(&receiver);
        assert!(recv_sized(&link, &mut received, 16384).is_err());

        producer.join().unwrap();

        // The chunk that made it across stays written.
        assert_eq!(received.len(), 8192);
    }
}
