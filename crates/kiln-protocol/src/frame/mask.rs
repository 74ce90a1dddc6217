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

//! Payload masking.

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Applies the masking key to the given buffer in place.
///
/// Masking is an XOR of every byte with the key byte at the same position
/// modulo 4, so applying the same key twice restores the original data.
///
/// # Examples
///
/// ```
/// use kiln_protocol::frame::mask::apply_mask;
///
/// // Mask and unmask buffer
/// let mut data = b"Hello".to_vec();
/// apply_mask(&mut data, [1, 2, 3, 4]);
/// apply_mask(&mut data, [1, 2, 3, 4]);
/// assert_eq!(data, b"Hello");
/// ```
#[inline]
pub fn apply_mask(buffer: &mut [u8], key: [u8; 4]) {
    // Process four bytes at a time, which lets the compiler vectorize the
    // loop, and handle the remainder byte by byte
    let mut chunks = buffer.chunks_exact_mut(4);
    for chunk in &mut chunks {
        for (byte, k) in chunk.iter_mut().zip(key) {
            *byte ^= k;
        }
    }
    for (byte, k) in chunks.into_remainder().iter_mut().zip(key) {
        *byte ^= k;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
