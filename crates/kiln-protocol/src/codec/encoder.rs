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

//! Frame encoder.

use crate::frame::mask::apply_mask;
use crate::frame::{Frame, FrameHead};

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Frame encoder.
///
/// The encoder selects the [`FrameHead`] from the payload length, writes the
/// header, and appends the masking key and masked payload for masked frames,
/// or the raw payload otherwise.
///
/// # Examples
///
/// ```
/// use kiln_protocol::{Encoder, Frame};
///
/// // Encode text frame
/// let bytes = Encoder::encode(&Frame::text("Hi"));
/// assert_eq!(bytes, [0x81, 0x02, b'H', b'i']);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct Encoder;

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Encoder {
    /// Encodes the given frame into a new buffer.
    #[must_use]
    pub fn encode(frame: &Frame) -> Vec<u8> {
        let head = FrameHead::for_len(frame.payload_len());
        let capacity = head.size() + 4 + frame.payload().len();
        let mut buffer = Vec::with_capacity(capacity);
        Self::encode_into(frame, &mut buffer);
        buffer
    }

    /// Encodes the given frame, appending it to the buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use kiln_protocol::{Encoder, Frame};
    ///
    /// // Encode masked text frame
    /// let mut buffer = Vec::new();
    /// let frame = Frame::text("Hi").with_mask([1, 2, 3, 4]);
    /// Encoder::encode_into(&frame, &mut buffer);
    /// assert_eq!(buffer, [0x81, 0x82, 1, 2, 3, 4, b'H' ^ 1, b'i' ^ 2]);
    /// ```
    pub fn encode_into(frame: &Frame, buffer: &mut Vec<u8>) {
        let head = FrameHead::for_len(frame.payload_len());
        head.write(frame, buffer);

        // Masked frames carry the key right after the header, followed by
        // the payload, which we mask in place after copying it
        let start = buffer.len();
        if let Some(key) = frame.masking_key() {
            buffer.extend_from_slice(&key);
            buffer.extend_from_slice(frame.payload());
            apply_mask(&mut buffer[start + 4..], key);
        } else {
            buffer.extend_from_slice(frame.payload());
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CloseCode, OpCode};

    #[test]
    fn test_header_sizes() {
        let cases = [
            (0, 2, 0),
            (125, 2, 125),
            (126, 4, 126),
            (65535, 4, 126),
            (65536, 10, 127),
        ];
        for (len, size, marker) in cases {
            let bytes = Encoder::encode(&Frame::binary(vec![7; len]));
            assert_eq!(bytes.len(), size + len, "len: {len}");
            assert_eq!(bytes[1], marker);
        }
    }

    #[test]
    fn test_fin_and_opcode() {
        let frame = Frame::new(false, OpCode::Continuation, b"x".to_vec());
        assert_eq!(Encoder::encode(&frame)[0], 0x00);

        let frame = Frame::close(CloseCode::NORMAL, "");
        assert_eq!(Encoder::encode(&frame), [0x88, 0x02, 0x03, 0xE8]);
    }

    #[test]
    fn test_masked_payload() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let frame = Frame::text("Hello").with_mask(key);

        // RFC 6455 Section 5.7, single-frame masked text message
        let bytes = Encoder::encode(&frame);
        assert_eq!(
            bytes,
            [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }
}
