// Copyright (c) 2025 Zensical and contributors

// SPDX-License-Identifier: MIT
// Third-party contributions licensed under DCO

// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:

// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NON-INFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

// ----------------------------------------------------------------------------

//! Frame codec error.

use std::result;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Frame codec error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Fewer than two bytes are available.
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Operation code is reserved.
    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Extended length, masking key or payload is truncated.
    #[error("insufficient bytes: expected {expected}, got {actual}")]
    InsufficientBytes {
        /// Number of bytes required.
        expected: u64,
        /// Number of bytes available.
        actual: u64,
    },

    /// Reserved bits are set.
    #[error("reserved bits set: {0:#05b}")]
    ReservedBits(u8),

    /// Control frame is fragmented.
    #[error("control frame must not be fragmented")]
    ControlFrameFragmented,

    /// Control frame payload exceeds 125 bytes.
    #[error("control frame payload too large: {0} bytes")]
    ControlFrameTooLarge(u64),

    /// Payload exceeds the configured limit.
    #[error("frame too large: {len} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Declared payload length.
        len: u64,
        /// Configured limit.
        limit: u64,
    },
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Error {
    /// Returns whether the error only indicates that more bytes are needed.
    ///
    /// Incomplete input is not malformed, so callers that buffer input from
    /// a stream should wait for more bytes instead of failing.
    #[inline]
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Error::FrameTooShort(_) | Error::InsufficientBytes { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Type aliases
// ----------------------------------------------------------------------------

/// Frame codec result.
pub type Result<T = ()> = result::Result<T, Error>;
