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

//! Operation code.

use std::fmt;

use crate::codec::Error;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Operation code.
///
/// The operation code determines how the payload of a frame is interpreted.
/// Values from `0x3` to `0x7` and from `0xB` to `0xF` are reserved, and are
/// rejected when decoding.
///
/// # Examples
///
/// ```
/// use kiln_protocol::OpCode;
///
/// // Convert nibble to operation code
/// let opcode = OpCode::try_from(0x9)?;
/// assert_eq!(opcode, OpCode::Ping);
/// assert!(opcode.is_control());
/// # Ok::<(), kiln_protocol::codec::Error>(())
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text data.
    Text,
    /// Binary data.
    Binary,
    /// Connection close.
    Close,
    /// Liveness check.
    Ping,
    /// Liveness check response.
    Pong,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl OpCode {
    /// Returns whether the operation code denotes a control frame.
    ///
    /// Control frames are exactly those with a value of `0x8` or higher.
    #[inline]
    #[must_use]
    pub fn is_control(self) -> bool {
        u8::from(self) >= 0x8
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl TryFrom<u8> for OpCode {
    type Error = Error;

    /// Attempts to convert the lower nibble of a byte to an operation code.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::InvalidOpcode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    /// Converts an operation code to its 4-bit wire value.
    #[inline]
    fn from(opcode: OpCode) -> Self {
        match opcode {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

// ----------------------------------------------------------------------------

impl fmt::Display for OpCode {
    /// Formats the operation code for display.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            OpCode::Continuation => "continuation",
            OpCode::Text => "text",
            OpCode::Binary => "binary",
            OpCode::Close => "close",
            OpCode::Ping => "ping",
            OpCode::Pong => "pong",
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_control() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Continuation.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
    }

    #[test]
    fn test_try_from_valid() {
        for value in [0x0, 0x1, 0x2, 0x8, 0x9, 0xA] {
            let opcode = OpCode::try_from(value).unwrap();
            assert_eq!(u8::from(opcode), value);
        }
    }

    #[test]
    fn test_try_from_reserved() {
        for value in [0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert!(matches!(
                OpCode::try_from(value),
                Err(Error::InvalidOpcode(v)) if v == value
            ));
        }
    }
}
