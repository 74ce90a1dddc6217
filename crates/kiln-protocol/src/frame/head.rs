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

//! Frame header.

use super::Frame;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Length marker announcing a 16-bit extended payload length.
const MARKER_MEDIUM: u8 = 126;

/// Length marker announcing a 64-bit extended payload length.
const MARKER_LARGE: u8 = 127;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Frame header.
///
/// The header of a frame has one of three layouts, which is selected purely
/// from the payload length, as defined in RFC 6455 Section 5.2:
///
/// - [`FrameHead::Tiny`]: up to 125 bytes, length stored in 7 bits.
/// - [`FrameHead::Medium`]: up to 65535 bytes, 16-bit extended length.
/// - [`FrameHead::Large`]: everything else, 64-bit extended length.
///
/// Note that the masking key is not part of the header, as it's appended by
/// the [`Encoder`][] after the header has been written.
///
/// [`Encoder`]: crate::Encoder
///
/// # Examples
///
/// ```
/// use kiln_protocol::FrameHead;
///
/// // Select header layout from payload length
/// assert_eq!(FrameHead::for_len(125), FrameHead::Tiny);
/// assert_eq!(FrameHead::for_len(126), FrameHead::Medium);
/// assert_eq!(FrameHead::for_len(65536), FrameHead::Large);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameHead {
    /// 2-byte header.
    Tiny,
    /// 4-byte header.
    Medium,
    /// 10-byte header.
    Large,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl FrameHead {
    /// Selects the header layout for the given payload length.
    #[must_use]
    pub fn for_len(len: u64) -> Self {
        if len <= 125 {
            FrameHead::Tiny
        } else if len <= u64::from(u16::MAX) {
            FrameHead::Medium
        } else {
            FrameHead::Large
        }
    }

    /// Selects the header layout from the 7-bit length field of a header.
    #[must_use]
    pub fn for_marker(marker: u8) -> Self {
        match marker & 0x7F {
            MARKER_MEDIUM => FrameHead::Medium,
            MARKER_LARGE => FrameHead::Large,
            _ => FrameHead::Tiny,
        }
    }

    /// Returns the size of the header in bytes.
    #[inline]
    #[must_use]
    pub fn size(self) -> usize {
        2 + self.extended_size()
    }

    /// Returns the size of the extended payload length field in bytes.
    #[inline]
    #[must_use]
    pub fn extended_size(self) -> usize {
        match self {
            FrameHead::Tiny => 0,
            FrameHead::Medium => 2,
            FrameHead::Large => 8,
        }
    }

    /// Returns the 7-bit length field for the given payload length.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn marker(self, len: u64) -> u8 {
        match self {
            FrameHead::Tiny => len as u8,
            FrameHead::Medium => MARKER_MEDIUM,
            FrameHead::Large => MARKER_LARGE,
        }
    }

    /// Writes the header of the given frame to the buffer.
    ///
    /// The first byte carries the final fragment flag and operation code, the
    /// second byte the mask flag and length marker, followed by the extended
    /// payload length, if any. Reserved bits are always written as zero.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write(self, frame: &Frame, buffer: &mut Vec<u8>) {
        let len = frame.payload_len();
        let fin = u8::from(frame.is_fin()) << 7;
        let mask = u8::from(frame.is_masked()) << 7;
        buffer.push(fin | u8::from(frame.opcode()));
        buffer.push(mask | self.marker(len));

        // Append extended payload length in network byte order
        match self {
            FrameHead::Tiny => {}
            FrameHead::Medium => {
                buffer.extend_from_slice(&(len as u16).to_be_bytes());
            }
            FrameHead::Large => {
                buffer.extend_from_slice(&len.to_be_bytes());
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        let cases = [
            (0, FrameHead::Tiny, 2, 0),
            (125, FrameHead::Tiny, 2, 125),
            (126, FrameHead::Medium, 4, 126),
            (65535, FrameHead::Medium, 4, 126),
            (65536, FrameHead::Large, 10, 127),
            (u64::MAX, FrameHead::Large, 10, 127),
        ];
        for (len, head, size, marker) in cases {
            assert_eq!(FrameHead::for_len(len), head, "len: {len}");
            assert_eq!(head.size(), size);
            assert_eq!(head.marker(len), marker);
        }
    }

    #[test]
    fn test_for_marker_ignores_mask_bit() {
        assert_eq!(FrameHead::for_marker(0x80 | 126), FrameHead::Medium);
        assert_eq!(FrameHead::for_marker(0x80 | 127), FrameHead::Large);
        assert_eq!(FrameHead::for_marker(0x80 | 5), FrameHead::Tiny);
    }

    #[test]
    fn test_write_medium() {
        let frame = Frame::binary(vec![0; 300]);
        let mut buffer = Vec::new();
        FrameHead::Medium.write(&frame, &mut buffer);
        assert_eq!(buffer, [0x82, 126, 0x01, 0x2C]);
    }

    #[test]
    fn test_write_masked_large() {
        let frame = Frame::binary(vec![0; 70_000]).with_mask([0; 4]);
        let mut buffer = Vec::new();
        FrameHead::Large.write(&frame, &mut buffer);
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer[1], 0x80 | 127);
        assert_eq!(&buffer[2..], &70_000u64.to_be_bytes());
    }
}
