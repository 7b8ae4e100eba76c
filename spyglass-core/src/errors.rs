// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Spyglass.
#[derive(Debug)]
pub enum Error {
    /// An IO error occurred on the transport socket. Fatal for the session.
    TransportError(io::Error),
    /// An IO error occurred while reading, writing, or seeking a local file or pipe.
    IoError(io::Error),
    /// A peer violated the wire protocol: malformed command framing, an unexpected token, or a
    /// size prefix inconsistent with the transferred bytes.
    ProtocolError(&'static str),
    /// A default or user-defined limit was reached. Limits are used to prevent runaway transfers
    /// from malicious or mistaken requests.
    LimitError(&'static str),
    /// The stream contained malformed data and could not be decompressed.
    DecodeError(&'static str),
    /// An operating system resource (thread, pipe, buffer) could not be acquired.
    ResourceError(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::TransportError(ref err) => {
                write!(f, "transport error: {}", err)
            }
            Error::IoError(ref err) => {
                write!(f, "io error: {}", err)
            }
            Error::ProtocolError(msg) => {
                write!(f, "protocol violation: {}", msg)
            }
            Error::LimitError(constraint) => {
                write!(f, "limit reached: {}", constraint)
            }
            Error::DecodeError(msg) => {
                write!(f, "malformed stream: {}", msg)
            }
            Error::ResourceError(msg) => {
                write!(f, "resource exhausted: {}", msg)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::TransportError(ref err) => Some(err),
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a transport error.
pub fn transport_error<T>(err: io::Error) -> Result<T> {
    Err(Error::TransportError(err))
}

/// Convenience function to create a protocol error.
pub fn protocol_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::ProtocolError(msg))
}

/// Convenience function to create a limit error.
pub fn limit_error<T>(constraint: &'static str) -> Result<T> {
    Err(Error::LimitError(constraint))
}

/// Convenience function to create a decode error.
pub fn decode_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::DecodeError(msg))
}

/// Convenience function to create a resource error.
pub fn resource_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::ResourceError(msg))
}
