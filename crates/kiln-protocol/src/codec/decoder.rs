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

//! Frame decoder.

use crate::frame::mask::apply_mask;
use crate::frame::{Frame, FrameHead, OpCode};

use super::error::{Error, Result};

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Frame decoder.
///
/// The decoder holds no state between calls besides its payload limit. It
/// can either decode a single frame from a slice with [`Decoder::decode`],
/// or extract frames from a receive buffer that is filled incrementally with
/// [`Decoder::decode_from`], which waits until a frame is complete.
///
/// # Examples
///
/// ```
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// use kiln_protocol::{Decoder, OpCode};
///
/// // Decode masked text frame
/// let bytes = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
/// let frame = Decoder::new().decode(&bytes)?;
/// assert_eq!(frame.opcode(), OpCode::Text);
/// assert_eq!(frame.payload(), b"Hello");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Decoder {
    /// Maximum payload length.
    limit: u64,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Decoder {
    /// Creates a decoder without payload limit.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder rejecting payloads longer than the given limit.
    #[inline]
    #[must_use]
    pub fn with_limit(limit: u64) -> Self {
        Self { limit }
    }

    /// Decodes a single frame from the start of the given bytes.
    ///
    /// Bytes following the frame are ignored. Truncated input is reported
    /// as [`Error::FrameTooShort`] or [`Error::InsufficientBytes`].
    ///
    /// # Examples
    ///
    /// ```
    /// use kiln_protocol::codec::Error;
    /// use kiln_protocol::Decoder;
    ///
    /// // Decode truncated frame
    /// let res = Decoder::new().decode(&[0x81]);
    /// assert_eq!(res, Err(Error::FrameTooShort(1)));
    /// ```
    pub fn decode(&self, bytes: &[u8]) -> Result<Frame> {
        self.parse(bytes).map(|(frame, _)| frame)
    }

    /// Decodes the next frame from a receive buffer.
    ///
    /// If the buffer holds a complete frame, the frame is returned and its
    /// bytes are removed from the buffer. If more bytes are needed, `None`
    /// is returned and the buffer is left untouched. Malformed input is
    /// returned as an error, also leaving the buffer untouched, as there is
    /// no way to find the start of the next frame.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::error::Error;
    /// # fn main() -> Result<(), Box<dyn Error>> {
    /// use kiln_protocol::{Decoder, Encoder, Frame};
    ///
    /// // Feed frame in two parts
    /// let bytes = Encoder::encode(&Frame::text("Hello"));
    /// let mut buffer = bytes[..3].to_vec();
    /// assert_eq!(Decoder::new().decode_from(&mut buffer)?, None);
    ///
    /// // Complete frame
    /// buffer.extend_from_slice(&bytes[3..]);
    /// let frame = Decoder::new().decode_from(&mut buffer)?;
    /// assert_eq!(frame, Some(Frame::text("Hello")));
    /// assert!(buffer.is_empty());
    /// # Ok(())
    /// # }
    /// ```
    pub fn decode_from(&self, buffer: &mut Vec<u8>) -> Result<Option<Frame>> {
        match self.parse(buffer) {
            Ok((frame, consumed)) => {
                buffer.drain(..consumed);
                Ok(Some(frame))
            }
            Err(err) if err.is_incomplete() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Parses a frame, returning it with the number of bytes consumed.
    fn parse(&self, bytes: &[u8]) -> Result<(Frame, usize)> {
        let [b0, b1, ..] = *bytes else {
            return Err(Error::FrameTooShort(bytes.len()));
        };

        // First byte carries the final fragment flag, three reserved bits,
        // which must be zero as we don't negotiate extensions, and opcode
        let fin = b0 & 0x80 != 0;
        let opcode = OpCode::try_from(b0 & 0x0F)?;
        let rsv = (b0 >> 4) & 0x07;
        if rsv != 0 {
            return Err(Error::ReservedBits(rsv));
        }

        // Second byte carries the mask flag and length marker, which tells
        // us whether an extended payload length follows
        let masked = b1 & 0x80 != 0;
        let head = FrameHead::for_marker(b1);
        let mut offset = head.size();
        let ext = ensure(bytes, 2, head.extended_size())?;
        let len = match head {
            FrameHead::Tiny => u64::from(b1 & 0x7F),
            FrameHead::Medium => u64::from(u16::from_be_bytes([ext[0], ext[1]])),
            FrameHead::Large => {
                let mut buf = [0; 8];
                buf.copy_from_slice(ext);
                u64::from_be_bytes(buf)
            }
        };

        // Validate length constraints before waiting for the payload, so
        // oversized frames are rejected as early as possible
        if opcode.is_control() {
            if !fin {
                return Err(Error::ControlFrameFragmented);
            }
            if len > 125 {
                return Err(Error::ControlFrameTooLarge(len));
            }
        }
        if len > self.limit {
            return Err(Error::FrameTooLarge { len, limit: self.limit });
        }

        // Read masking key, if present
        let key = if masked {
            let key = ensure(bytes, offset, 4)?;
            offset += 4;
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        // Read and unmask payload
        let size = usize::try_from(len)
            .map_err(|_| Error::FrameTooLarge { len, limit: self.limit })?;
        let mut payload = ensure(bytes, offset, size)?.to_vec();
        let frame = match key {
            Some(key) => {
                apply_mask(&mut payload, key);
                Frame::new(fin, opcode, payload).with_mask(key)
            }
            None => Frame::new(fin, opcode, payload),
        };
        Ok((frame, offset + size))
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl Default for Decoder {
    /// Creates a decoder without payload limit.
    #[inline]
    fn default() -> Self {
        Self { limit: u64::MAX }
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Returns `len` bytes starting at `offset`, or an error if truncated.
fn ensure(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or_else(|| Error::InsufficientBytes {
            expected: (offset as u64).saturating_add(len as u64),
            actual: bytes.len() as u64,
        })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
