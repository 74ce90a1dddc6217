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

//! Connection session.

use kiln_protocol::OpCode;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Session phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the upgrade request.
    Handshake,
    /// Exchanging frames.
    Open,
}

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Connection session.
///
/// The server keeps a session for every connection until it is closed. The
/// receive buffer first accumulates the upgrade request, and after the
/// upgrade, all bytes not yet decoded into frames.
#[derive(Debug)]
pub struct Session {
    /// Session phase.
    pub phase: Phase,
    /// Receive buffer.
    pub buffer: Vec<u8>,
    /// Fragmented message, if any.
    pub fragment: Option<Fragment>,
}

/// Fragmented message.
#[derive(Debug)]
pub struct Fragment {
    /// Opcode of the first frame.
    pub opcode: OpCode,
    /// Payloads received so far.
    pub data: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Session {
    /// Creates a session waiting for the upgrade request.
    pub fn new() -> Self {
        Self {
            phase: Phase::Handshake,
            buffer: Vec::new(),
            fragment: None,
        }
    }
}
