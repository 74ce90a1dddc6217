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

//! WebSocket connection.

use kiln_protocol::{CloseCode, Encoder, Frame};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use serde::Serialize;
use std::cell::RefCell;
use std::fmt::{self, Write as _};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::rc::Rc;

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// WebSocket connection.
///
/// A connection is a cheap handle, which can be cloned and moved into tasks.
/// All clones share the same state, which consists of the socket, which is
/// exclusively owned by the connection, and a buffer for outgoing bytes that
/// could not be written yet, because the socket would block.
///
/// Once a connection is disconnected, it stays disconnected, and all sends
/// are silently ignored, so tasks that outlive their connection can keep
/// using the handle without further checks.
#[derive(Clone)]
pub struct Connection {
    /// Connection identifier.
    id: Rc<str>,
    /// Remote address.
    addr: SocketAddr,
    /// Shared state.
    inner: Rc<RefCell<Inner>>,
}

/// Shared state of a connection.
struct Inner {
    /// TCP socket, taken when the connection is detached.
    socket: Option<TcpStream>,
    /// Registry of the engine's poller.
    registry: Option<Rc<Registry>>,
    /// Token of the socket.
    token: Token,
    /// Bytes not yet written.
    outbox: Vec<u8>,
    /// Whether the socket is registered for writable events.
    writing: bool,
    /// Whether the connection is alive.
    connected: bool,
    /// Status code and reason, if closed with a close frame.
    status: Option<(CloseCode, String)>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Connection {
    /// Creates a connection for an accepted socket.
    pub(crate) fn new(
        socket: TcpStream, addr: SocketAddr, registry: Rc<Registry>,
        token: Token,
    ) -> Self {
        Self::from_parts(Some(socket), addr, Some(registry), token)
    }

    /// Creates a connection from its parts.
    fn from_parts(
        socket: Option<TcpStream>, addr: SocketAddr,
        registry: Option<Rc<Registry>>, token: Token,
    ) -> Self {
        Self {
            id: generate_id().into(),
            addr,
            inner: Rc::new(RefCell::new(Inner {
                socket,
                registry,
                token,
                outbox: Vec::new(),
                writing: false,
                connected: true,
                status: None,
            })),
        }
    }

    /// Registers the socket with the engine's poller.
    pub(crate) fn register(&self) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        let Inner { socket, registry, token, .. } = &mut *inner;
        match (socket, registry) {
            (Some(socket), Some(registry)) => {
                registry.register(socket, *token, Interest::READABLE)
            }
            _ => Ok(()),
        }
    }

    /// Sends a frame.
    ///
    /// The frame is encoded and written to the socket. If the socket would
    /// block, the remaining bytes are written once it becomes writable again.
    /// Returns `false` if the connection is disconnected.
    pub fn send(&self, frame: &Frame) -> bool {
        let mut inner = self.inner.borrow_mut();
        if !inner.connected {
            return false;
        }
        Encoder::encode_into(frame, &mut inner.outbox);
        inner.flush();
        true
    }

    /// Sends a text frame.
    #[inline]
    pub fn send_text<T>(&self, text: T) -> bool
    where
        T: Into<String>,
    {
        self.send(&Frame::text(text))
    }

    /// Sends a binary frame.
    #[inline]
    pub fn send_binary<T>(&self, data: T) -> bool
    where
        T: Into<Vec<u8>>,
    {
        self.send(&Frame::binary(data))
    }

    /// Sends a named event as a JSON text frame.
    ///
    /// The event is wrapped in an envelope of the form
    /// `{"event": "<name>", "data": <data>}`, which the server unwraps when
    /// it receives such a message from a client.
    ///
    /// # Errors
    ///
    /// This method returns an error if the data cannot be serialized.
    pub fn send_event<T>(
        &self, event: &str, data: &T,
    ) -> serde_json::Result<bool>
    where
        T: Serialize + ?Sized,
    {
        #[derive(Serialize)]
        struct Envelope<'a, T: ?Sized> {
            event: &'a str,
            data: &'a T,
        }

        // Serialize envelope and send as text
        serde_json::to_string(&Envelope { event, data })
            .map(|text| self.send_text(text))
    }

    /// Sends a ping frame.
    #[inline]
    pub fn ping<T>(&self, payload: T) -> bool
    where
        T: Into<Vec<u8>>,
    {
        self.send(&Frame::ping(payload))
    }

    /// Closes the connection with the given status code and reason.
    ///
    /// The close frame is written on a best-effort basis - if the socket
    /// would block or fails, the frame is dropped. Afterwards, the socket is
    /// shut down and released. Closing a disconnected connection does nothing.
    pub fn close(&self, code: CloseCode, reason: &str) {
        let mut inner = self.inner.borrow_mut();
        if inner.connected {
            let frame = Frame::close(code, reason);
            Encoder::encode_into(&frame, &mut inner.outbox);
            inner.flush();
            inner.detach();
            inner.status = Some((code, reason.to_string()));
        }
    }

    /// Disconnects without sending a close frame.
    ///
    /// Pending bytes are written on a best-effort basis, which is used to
    /// deliver a handshake rejection before dropping the socket.
    pub fn disconnect(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.connected {
            inner.flush();
            inner.detach();
        }
    }

    /// Writes raw bytes, bypassing the frame encoder.
    pub(crate) fn write_raw(&self, bytes: &[u8]) -> bool {
        let mut inner = self.inner.borrow_mut();
        if !inner.connected {
            return false;
        }
        inner.outbox.extend_from_slice(bytes);
        inner.flush();
        true
    }

    /// Reads bytes from the socket.
    pub(crate) fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        match inner.socket.as_mut() {
            Some(socket) => socket.read(buffer),
            None => Err(ErrorKind::NotConnected.into()),
        }
    }

    /// Writes pending bytes to the socket.
    pub(crate) fn flush(&self) {
        self.inner.borrow_mut().flush();
    }

    /// Detaches the socket without writing anything.
    pub(crate) fn detach(&self) {
        self.inner.borrow_mut().detach();
    }

    /// Returns the status code and reason the connection was closed with.
    ///
    /// This is `None` while connected, and when the connection was dropped
    /// without a close frame, e.g., because the peer disconnected.
    pub(crate) fn status(&self) -> Option<(CloseCode, String)> {
        self.inner.borrow().status.clone()
    }
}

#[allow(clippy::must_use_candidate)]
impl Connection {
    /// Returns the connection identifier.
    ///
    /// Identifiers are 16 random bytes, hex-encoded.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the remote address.
    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns whether the connection is alive.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.inner.borrow().connected
    }
}

#[cfg(test)]
impl Connection {
    /// Creates a connection without socket, which keeps all output.
    pub(crate) fn unbound() -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        Self::from_parts(None, addr, None, Token(0))
    }

    /// Takes all output written so far.
    pub(crate) fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.borrow_mut().outbox)
    }
}

// ----------------------------------------------------------------------------

impl Inner {
    /// Writes as many pending bytes as possible.
    fn flush(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };

        // We try to write all remaining data - if the socket would block, we
        // register for writable events and continue once it's writable again
        let mut written = 0;
        let res = loop {
            if written >= self.outbox.len() {
                break Ok(());
            }
            match socket.write(&self.outbox[written..]) {
                Ok(0) => break Err(ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => break Err(err),
            }
        };
        self.outbox.drain(..written);

        // Update interest, or detach the socket if writing failed
        match res {
            Ok(()) => self.set_writing(false),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                self.set_writing(true);
            }
            Err(err) => {
                tracing::debug!(%err, "write failed");
                self.detach();
            }
        }
    }

    /// Updates whether the socket is registered for writable events.
    fn set_writing(&mut self, writing: bool) {
        if self.writing == writing {
            return;
        }
        let (Some(socket), Some(registry)) =
            (self.socket.as_mut(), self.registry.as_ref())
        else {
            return;
        };

        // Always keep readable interest, so we notice when the peer hangs up
        let interest = if writing {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        match registry.reregister(socket, self.token, interest) {
            Ok(()) => self.writing = writing,
            Err(err) => tracing::warn!(%err, "reregistration failed"),
        }
    }

    /// Marks the connection as disconnected and releases the socket.
    fn detach(&mut self) {
        self.connected = false;
        if let Some(mut socket) = self.socket.take() {
            if let Some(registry) = self.registry.as_ref() {
                let _ = registry.deregister(&mut socket);
            }
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl PartialEq for Connection {
    /// Compares connections by identity.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

// ----------------------------------------------------------------------------

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Generates a connection identifier from 16 random bytes.
fn generate_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().fold(String::with_capacity(32), |mut id, byte| {
        let _ = write!(id, "{byte:02x}");
        id
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_protocol::{Decoder, OpCode};

    #[test]
    fn test_id() {
        let a = Connection::unbound();
        let b = Connection::unbound();
        assert_eq!(a.id().len(), 32);
        assert!(a.id().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_send() {
        let conn = Connection::unbound();
        assert!(conn.send_text("Hello"));
        let frame = Decoder::new().decode(&conn.take_output()).unwrap();
        assert_eq!(frame, Frame::text("Hello"));
    }

    #[test]
    fn test_send_event() {
        let conn = Connection::unbound();
        assert!(conn.send_event("chat", &"hi").unwrap());
        let frame = Decoder::new().decode(&conn.take_output()).unwrap();
        assert_eq!(frame.as_text(), Some(r#"{"event":"chat","data":"hi"}"#));
    }

    #[test]
    fn test_close_then_send_is_noop() {
        let conn = Connection::unbound();
        conn.close(CloseCode::GOING_AWAY, "bye");
        assert!(!conn.is_connected());

        // Close frame was written before disconnecting
        let frame = Decoder::new().decode(&conn.take_output()).unwrap();
        assert_eq!(frame.opcode(), OpCode::Close);
        assert_eq!(frame.close_code(), CloseCode::GOING_AWAY);
        let status = Some((CloseCode::GOING_AWAY, String::from("bye")));
        assert_eq!(conn.status(), status);

        // Sending and closing again does nothing
        assert!(!conn.send_text("late"));
        conn.close(CloseCode::NORMAL, "");
        assert!(conn.take_output().is_empty());
    }
}
