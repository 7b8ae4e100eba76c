// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements bit-level I/O over borrowed byte slices.
//!
//! All readers in this module consume a `&[u8]`. The bit-oriented reader keeps a byte cursor that
//! is shared with its byte-aligned read operations, because the stream formats it serves
//! interleave bit-packed fields with byte-aligned escape values.

mod bit;

pub use bit::BitReader16Le;
