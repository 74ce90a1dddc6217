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

//! Upgrade handshake.
//!
//! A WebSocket connection starts out as an HTTP/1.1 request asking the server
//! to switch protocols. This module parses that request, validates it, and
//! renders the responses accepting or rejecting the upgrade, following
//! RFC 6455 Section 4.2.

use base64::prelude::*;
use sha1_smol::Sha1;
use std::str;

mod error;
mod headers;

pub use error::{Error, Result};
pub use headers::Headers;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Globally unique identifier appended to the client key.
pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Maximum number of headers in an upgrade request.
const MAX_HEADERS: usize = 64;

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Upgrade request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Request method.
    pub method: String,
    /// Request target.
    pub path: String,
    /// Request headers.
    pub headers: Headers,
    /// Length of the header block in bytes, including the blank line.
    pub len: usize,
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Parses an upgrade request from the given bytes.
///
/// Requests are parsed using the [`httparse`] crate. If the bytes do not yet
/// contain the complete header block, terminated by a blank line, `None` is
/// returned, so the caller can wait for more data. Bytes following the header
/// block are not consumed, and [`Request::len`] tells where they start.
///
/// # Errors
///
/// This function returns [`Error::Parser`] if the header block is malformed,
/// and [`Error::Encoding`] if a header value is not valid UTF-8.
///
/// # Examples
///
/// ```
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// use kiln_protocol::handshake::parse_request;
///
/// // Parse incomplete request
/// let req = parse_request(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n")?;
/// assert!(req.is_none());
///
/// // Parse complete request
/// let req = parse_request(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n")?;
/// assert_eq!(req.unwrap().headers.get("Upgrade"), Some("websocket"));
/// # Ok(())
/// # }
/// ```
pub fn parse_request(bytes: &[u8]) -> Result<Option<Request>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let httparse::Status::Complete(len) = req.parse(bytes)? else {
        return Ok(None);
    };

    // Convert header names and values to owned strings - header names are
    // guaranteed to be valid tokens, but values might contain arbitrary bytes
    let mut map = Headers::new();
    for header in req.headers.iter() {
        let value = str::from_utf8(header.value)
            .map_err(|_| Error::Encoding(header.name.to_string()))?;
        map.insert(header.name, value);
    }

    // Return request
    Ok(Some(Request {
        method: req.method.unwrap_or_default().to_string(),
        path: req.path.unwrap_or_default().to_string(),
        headers: map,
        len,
    }))
}

/// Returns whether the headers describe a valid WebSocket upgrade.
///
/// A valid upgrade carries a `Sec-WebSocket-Key` header, and an `Upgrade`
/// header with the value `websocket`, compared case-insensitively.
///
/// # Examples
///
/// ```
/// use kiln_protocol::handshake::{is_valid_upgrade_request, Headers};
///
/// // Create headers for upgrade request
/// let mut headers = Headers::new();
/// headers.insert("Upgrade", "WebSocket");
/// headers.insert("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
/// assert!(is_valid_upgrade_request(&headers));
/// ```
#[must_use]
pub fn is_valid_upgrade_request(headers: &Headers) -> bool {
    let upgrade = headers.get("Upgrade");
    headers.contains("Sec-WebSocket-Key")
        && upgrade.is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// Computes the accept key for the given client key.
///
/// This follows RFC 6455 Section 4.2.2, which requires:
///
/// 1. Concatenating the client key with the [`GUID`]
/// 2. Computing the SHA-1 hash of the result
/// 3. Base64 encoding the hash
///
/// # Examples
///
/// ```
/// use kiln_protocol::handshake::create_accept_key;
///
/// // Compute accept key for sample nonce
/// let accept = create_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn create_accept_key<K>(key: K) -> String
where
    K: AsRef<[u8]>,
{
    let mut hasher = Sha1::new();
    hasher.update(key.as_ref());
    hasher.update(GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.digest().bytes())
}

/// Renders the response accepting the upgrade for the given client key.
///
/// # Examples
///
/// ```
/// use kiln_protocol::handshake::create_response;
///
/// // Render response accepting upgrade
/// let res = create_response("dGhlIHNhbXBsZSBub25jZQ==");
/// assert!(res.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
/// assert!(res.ends_with("\r\n\r\n"));
/// ```
pub fn create_response<K>(key: K) -> String
where
    K: AsRef<[u8]>,
{
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        create_accept_key(key)
    )
}

/// Renders the response rejecting the upgrade.
///
/// # Examples
///
/// ```
/// use kiln_protocol::handshake::create_error_response;
///
/// // Render response rejecting upgrade
/// let res = create_error_response(400, "Bad Request");
/// assert_eq!(res, "HTTP/1.1 400 Bad Request\r\n\r\n");
/// ```
#[must_use]
pub fn create_error_response(code: u16, message: &str) -> String {
    format!("HTTP/1.1 {code} {message}\r\n\r\n")
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn test_accept_key() {
        assert_eq!(
            create_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_parse_request() {
        let req = parse_request(REQUEST).unwrap().unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/chat");
        assert_eq!(req.len, REQUEST.len());
        assert_eq!(req.headers.len(), 5);
        assert_eq!(req.headers.get("Host"), Some("server.example.com"));
        assert!(is_valid_upgrade_request(&req.headers));
    }

    #[test]
    fn test_parse_request_incomplete() {
        for n in 0..REQUEST.len() {
            assert_eq!(parse_request(&REQUEST[..n]).unwrap(), None);
        }
    }

    #[test]
    fn test_parse_request_trailing_bytes() {
        let mut bytes = REQUEST.to_vec();
        bytes.extend_from_slice(&[0x81, 0x80]);
        let req = parse_request(&bytes).unwrap().unwrap();
        assert_eq!(&bytes[req.len..], &[0x81, 0x80]);
    }

    #[test]
    fn test_parse_request_malformed() {
        assert!(parse_request(b"GET / HTTP/1.1\r\nNo Colon\r\n\r\n").is_err());
    }

    #[test]
    fn test_missing_key() {
        let mut headers = Headers::new();
        headers.insert("Upgrade", "websocket");
        assert!(!is_valid_upgrade_request(&headers));
    }

    #[test]
    fn test_wrong_upgrade() {
        let mut headers = Headers::new();
        headers.insert("Upgrade", "Something-Else");
        headers.insert("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        assert!(!is_valid_upgrade_request(&headers));
    }

    #[test]
    fn test_upgrade_any_case() {
        for value in ["websocket", "WebSocket", "WEBSOCKET"] {
            let mut headers = Headers::new();
            headers.insert("Upgrade", value);
            headers.insert("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
            assert!(is_valid_upgrade_request(&headers));
        }
    }

    #[test]
    fn test_create_response() {
        assert_eq!(
            create_response("dGhlIHNhbXBsZSBub25jZQ=="),
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
    }
}
