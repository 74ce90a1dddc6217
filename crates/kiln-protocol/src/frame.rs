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

//! WebSocket frame.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)   |          Payload Data         |
//! +-------------------------------+ - - - - - - - - - - - - - - - +
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```

use std::str;

mod close;
mod head;
pub mod mask;
mod opcode;

pub use close::CloseCode;
pub use head::FrameHead;
pub use opcode::OpCode;

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// WebSocket frame.
///
/// Frames are immutable values. The payload is always stored unmasked, and
/// the masking key, if any, is only applied when the frame is encoded, which
/// means that a decoded frame compares equal to the frame it was encoded from.
///
/// # Examples
///
/// ```
/// use kiln_protocol::{Frame, OpCode};
///
/// // Create text frame
/// let frame = Frame::text("Hello");
/// assert_eq!(frame.opcode(), OpCode::Text);
/// assert_eq!(frame.payload_len(), 5);
/// assert!(frame.is_fin());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    fin: bool,
    /// Operation code.
    opcode: OpCode,
    /// Masking key, present if and only if the frame is masked.
    masking_key: Option<[u8; 4]>,
    /// Unmasked payload.
    payload: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Frame {
    /// Creates an unmasked frame.
    ///
    /// # Examples
    ///
    /// ```
    /// use kiln_protocol::{Frame, OpCode};
    ///
    /// // Create first fragment of a binary message
    /// let frame = Frame::new(false, OpCode::Binary, vec![1, 2, 3]);
    /// assert!(!frame.is_fin());
    /// ```
    #[must_use]
    pub fn new<P>(fin: bool, opcode: OpCode, payload: P) -> Self
    where
        P: Into<Vec<u8>>,
    {
        Self {
            fin,
            opcode,
            masking_key: None,
            payload: payload.into(),
        }
    }

    /// Creates a final text frame.
    #[inline]
    #[must_use]
    pub fn text<P>(payload: P) -> Self
    where
        P: Into<String>,
    {
        Self::new(true, OpCode::Text, payload.into())
    }

    /// Creates a final binary frame.
    #[inline]
    #[must_use]
    pub fn binary<P>(payload: P) -> Self
    where
        P: Into<Vec<u8>>,
    {
        Self::new(true, OpCode::Binary, payload)
    }

    /// Creates a ping frame.
    #[inline]
    #[must_use]
    pub fn ping<P>(payload: P) -> Self
    where
        P: Into<Vec<u8>>,
    {
        Self::new(true, OpCode::Ping, payload)
    }

    /// Creates a pong frame.
    #[inline]
    #[must_use]
    pub fn pong<P>(payload: P) -> Self
    where
        P: Into<Vec<u8>>,
    {
        Self::new(true, OpCode::Pong, payload)
    }

    /// Creates a close frame with the given status code and reason.
    ///
    /// The payload consists of the big-endian status code, followed by the
    /// UTF-8 encoded reason.
    ///
    /// # Examples
    ///
    /// ```
    /// use kiln_protocol::{CloseCode, Frame};
    ///
    /// // Create close frame
    /// let frame = Frame::close(CloseCode::GOING_AWAY, "bye");
    /// assert_eq!(frame.payload(), b"\x03\xe9bye");
    /// ```
    #[must_use]
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let code = u16::from(code);
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::new(true, OpCode::Close, payload)
    }

    /// Returns the frame masked with the given key.
    ///
    /// # Examples
    ///
    /// ```
    /// use kiln_protocol::Frame;
    ///
    /// // Create masked text frame
    /// let frame = Frame::text("Hello").with_mask([1, 2, 3, 4]);
    /// assert_eq!(frame.masking_key(), Some([1, 2, 3, 4]));
    /// ```
    #[inline]
    #[must_use]
    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.masking_key = Some(key);
        self
    }

    /// Returns the frame masked with a randomly generated key.
    #[inline]
    #[must_use]
    pub fn with_random_mask(self) -> Self {
        self.with_mask(rand::random())
    }

    /// Returns the frame without masking key.
    #[inline]
    #[must_use]
    pub fn without_mask(mut self) -> Self {
        self.masking_key = None;
        self
    }
}

#[allow(clippy::must_use_candidate)]
impl Frame {
    /// Returns whether this is the final fragment of a message.
    #[inline]
    pub fn is_fin(&self) -> bool {
        self.fin
    }

    /// Returns the operation code.
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Returns whether the frame is masked.
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.masking_key.is_some()
    }

    /// Returns the masking key, if any.
    #[inline]
    pub fn masking_key(&self) -> Option<[u8; 4]> {
        self.masking_key
    }

    /// Returns the logical payload length.
    #[inline]
    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Returns the unmasked payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame and returns the unmasked payload.
    #[inline]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Returns the status code of a close frame.
    ///
    /// Payloads shorter than two bytes carry no status code, in which case
    /// [`CloseCode::NORMAL`] is returned, as is the case for frames that are
    /// not close frames at all.
    ///
    /// # Examples
    ///
    /// ```
    /// use kiln_protocol::{CloseCode, Frame};
    ///
    /// // Extract status code from close frame
    /// let frame = Frame::close(CloseCode::from(1001), "bye");
    /// assert_eq!(frame.close_code(), CloseCode::GOING_AWAY);
    /// ```
    pub fn close_code(&self) -> CloseCode {
        match (self.opcode, self.payload.as_slice()) {
            (OpCode::Close, [hi, lo, ..]) => {
                CloseCode::from(u16::from_be_bytes([*hi, *lo]))
            }
            _ => CloseCode::NORMAL,
        }
    }

    /// Returns the reason of a close frame.
    ///
    /// Reasons that are not valid UTF-8 are replaced lossily.
    pub fn close_reason(&self) -> String {
        match (self.opcode, self.payload.get(2..)) {
            (OpCode::Close, Some(reason)) => {
                String::from_utf8_lossy(reason).into_owned()
            }
            _ => String::new(),
        }
    }

    /// Returns the payload as a string slice, if it is valid UTF-8.
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        str::from_utf8(&self.payload).ok()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let cases = [
            (Frame::text("a"), OpCode::Text),
            (Frame::binary(vec![1]), OpCode::Binary),
            (Frame::ping("p"), OpCode::Ping),
            (Frame::pong("p"), OpCode::Pong),
            (Frame::close(CloseCode::NORMAL, ""), OpCode::Close),
        ];
        for (frame, opcode) in cases {
            assert!(frame.is_fin());
            assert!(!frame.is_masked());
            assert_eq!(frame.opcode(), opcode);
        }
    }

    #[test]
    fn test_close_payload() {
        let frame = Frame::close(CloseCode::GOING_AWAY, "bye");
        assert_eq!(frame.payload(), &[0x03, 0xE9, b'b', b'y', b'e']);
        assert_eq!(frame.close_code(), CloseCode::GOING_AWAY);
        assert_eq!(frame.close_reason(), "bye");
    }

    #[test]
    fn test_close_defaults() {
        let frame = Frame::new(true, OpCode::Close, Vec::new());
        assert_eq!(frame.close_code(), CloseCode::NORMAL);
        assert_eq!(frame.close_reason(), "");

        // A single byte is too short to carry a status code
        let frame = Frame::new(true, OpCode::Close, vec![0x03]);
        assert_eq!(frame.close_code(), CloseCode::NORMAL);
        assert_eq!(frame.close_reason(), "");
    }

    #[test]
    fn test_mask_does_not_touch_payload() {
        let frame = Frame::text("Hello").with_mask([0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(frame.is_masked());
        assert_eq!(frame.payload(), b"Hello");
        assert_eq!(frame.payload_len(), 5);

        let frame = frame.without_mask();
        assert!(!frame.is_masked());
        assert_eq!(frame.masking_key(), None);
    }

    #[test]
    fn test_random_mask() {
        let frame = Frame::binary(vec![0; 8]).with_random_mask();
        assert!(frame.masking_key().is_some());
    }
}
