// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::debug;

use spyglass_core::errors::{decode_error, Result};
use spyglass_core::io::BitReader16Le;

use crate::huffman::{HuffmanTree, TABLE_LEN};
use crate::CHUNK_SIZE;

/// Base length added to every match.
const MATCH_LEN_BASE: usize = 3;

/// Match length nibble value signalling a byte-aligned length escape.
const MATCH_LEN_ESCAPE: usize = 15;

/// Escalated match length signalling a 16-bit replacement length.
const MATCH_LEN_WIDE: usize = 270;

/// Minimum encoded chunk size: the code length table plus the 4 bytes that prime the bit buffer.
const MIN_CHUNK_LEN: usize = TABLE_LEN + 4;

/// Decode one chunk of up to [`CHUNK_SIZE`] output bytes.
///
/// `compressed_pos` and `out_pos` are advanced past the consumed input and the produced output
/// respectively. A match is allowed to run past the chunk boundary as long as it stays within
/// the output slice; the loop then terminates at the boundary check.
pub(crate) fn decode_chunk(
    compressed: &[u8],
    compressed_pos: &mut usize,
    out: &mut [u8],
    out_pos: &mut usize,
) -> Result<()> {
    let start = *compressed_pos;

    if start >= compressed.len() || compressed.len() - start < MIN_CHUNK_LEN {
        return decode_error("lzxh: compressed chunk truncated");
    }

    let chunk = &compressed[start..];

    let tree = HuffmanTree::read(&chunk[..TABLE_LEN])?;

    // Prime the bit buffer with the two packets following the table.
    let mut reader = BitReader16Le::new(chunk);
    reader.seek(TABLE_LEN);
    reader.refill();
    reader.refill();

    let chunk_end = (*out_pos + CHUNK_SIZE).min(out.len());

    debug!("lzxh: chunk at +{}, output {}..{}", start, *out_pos, chunk_end);

    while (reader.pos() < reader.len() || reader.num_bits_left() > 0) && *out_pos < chunk_end {
        let symbol = tree.decode_symbol(&mut reader)?;

        if reader.num_bits_left() < 16 {
            reader.refill();
        }

        if symbol < 256 {
            out[*out_pos] = symbol as u8;
            *out_pos += 1;
        }

        // An emptied bit buffer at the overall output target is the end-of-stream marker.
        if reader.bit_buffer() == 0 && *out_pos >= out.len() {
            break;
        }

        if symbol >= 256 {
            let header = symbol - 256;
            let mut length = usize::from(header & 0x000f);
            let distance_bits = u32::from(header >> 4);

            // distance_bits == 0 encodes a distance of exactly 1; otherwise the extra bits hold
            // the distance below its leading power-of-two bit.
            let mut distance = 0usize;
            if distance_bits > 0 {
                if reader.num_bits_left() < distance_bits {
                    return decode_error("lzxh: bitstream underflow while reading a match distance");
                }
                distance = reader.peek_bits(distance_bits) as usize;
                reader.consume_bits(distance_bits);
            }
            distance |= 1 << distance_bits;

            if length == MATCH_LEN_ESCAPE {
                length = usize::from(reader.read_u8()?) + MATCH_LEN_ESCAPE;

                // The wide escape REPLACES the accumulated length rather than adding to it.
                if length == MATCH_LEN_WIDE {
                    length = usize::from(reader.read_u16()?);
                }
            }
            length += MATCH_LEN_BASE;

            if distance > *out_pos {
                return decode_error("lzxh: match distance reaches before the output start");
            }
            if length > out.len() - *out_pos {
                return decode_error("lzxh: match length exceeds the output capacity");
            }

            // Copy forwards one byte at a time: an overlapping self-reference replicates a run.
            let mut src = *out_pos - distance;
            for _ in 0..length {
                out[*out_pos] = out[src];
                *out_pos += 1;
                src += 1;
            }

            if reader.num_bits_left() < 16 {
                reader.refill();
            }
        }
    }

    *compressed_pos = start + reader.pos();

    Ok(())
}
