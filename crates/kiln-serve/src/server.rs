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

//! WebSocket server.

use kiln_protocol::codec::Error as DecodeError;
use kiln_protocol::handshake::{self, is_valid_upgrade_request};
use kiln_protocol::{CloseCode, Decoder, Frame, OpCode};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use super::config::Config;
use super::dispatcher::Dispatcher;
use super::engine::{BoxError, Connection, Handler, Task, TaskResult};

mod clients;
mod context;
mod session;

pub use clients::Clients;
pub use context::{Context, Payload};
use session::{Fragment, Phase, Session};

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// WebSocket server.
///
/// The server is the [`Handler`] that turns the raw bytes delivered by the
/// [`Engine`][] into events. Each connection starts out waiting for the
/// upgrade request, and once upgraded, its bytes are decoded into frames,
/// which are dispatched to listeners by event name:
///
/// - `open`: the upgrade handshake completed
/// - `message`: a text or binary message was received
/// - `pong`: a pong frame was received
/// - `close`: the connection was closed by either side
/// - `error`: a frame could not be decoded, or a listener failed
///
/// Text and binary messages that contain a JSON envelope of the form
/// `{"event": "<name>", "data": <data>}` are dispatched under that name, with
/// the data as payload. Pings are answered automatically.
///
/// [`Engine`]: crate::engine::Engine
///
/// # Examples
///
/// ```no_run
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// use kiln_serve::config::Config;
/// use kiln_serve::engine::Engine;
/// use kiln_serve::server::Server;
///
/// // Create server that relays all messages to all clients
/// let config = Config::default();
/// let mut server = Server::new(&config);
/// server.on("message", |ctx| {
///     if let Some(text) = ctx.text() {
///         ctx.clients().broadcast(text);
///     }
///     Ok(())
/// });
///
/// // Create engine and run server
/// let mut engine = Engine::new(server, &config)?;
/// engine.listen(config.addr())?;
/// engine.run()?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    /// Event dispatcher.
    dispatcher: Dispatcher<Context>,
    /// Sessions by connection identifier.
    sessions: HashMap<String, Session>,
    /// Connected clients.
    clients: Clients,
    /// Frame decoder.
    decoder: Decoder,
    /// Largest accepted message, in bytes.
    max_message_size: usize,
    /// Largest accepted upgrade request, in bytes.
    max_handshake_size: usize,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Server {
    /// Creates a server.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            sessions: HashMap::new(),
            clients: Clients::default(),
            decoder: Decoder::with_limit(config.max_frame_size),
            max_message_size: usize::try_from(config.max_frame_size)
                .unwrap_or(usize::MAX),
            max_handshake_size: config.max_handshake_size,
        }
    }

    /// Registers a synchronous listener for the given event.
    pub fn on<N, F>(&mut self, name: N, f: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(Context) -> TaskResult + 'static,
    {
        self.dispatcher.on(name, f);
        self
    }

    /// Registers an asynchronous listener for the given event.
    pub fn on_async<N, F, R>(&mut self, name: N, f: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(Context) -> R + 'static,
        R: Future<Output = TaskResult> + 'static,
    {
        self.dispatcher.on_async(name, f);
        self
    }

    /// Sends a text message to all clients.
    ///
    /// Returns the number of clients the message was sent to.
    #[inline]
    pub fn broadcast(&self, text: &str) -> usize {
        self.clients.broadcast(text)
    }

    /// Sends a text message to all clients matching the filter.
    ///
    /// Returns the number of clients the message was sent to.
    #[inline]
    pub fn broadcast_with<F>(&self, text: &str, filter: F) -> usize
    where
        F: FnMut(&Connection) -> bool,
    {
        self.clients.broadcast_with(text, filter)
    }

    /// Dispatches an event for the given connection.
    fn emit(&self, conn: &Connection, event: &str, payload: Payload) -> Task {
        let clients = self.clients.clone();
        let ctx = Context::new(conn.clone(), clients, event, payload);
        self.dispatcher.dispatch(event, ctx)
    }

    /// Dispatches an error for the given connection.
    fn emit_error<E>(&self, conn: &Connection, err: E) -> Task
    where
        E: fmt::Display,
    {
        self.emit(conn, "error", Payload::Error(err.to_string()))
    }

    /// Processes the upgrade request.
    ///
    /// Returns whether the session is still alive.
    fn handshake(
        &self, conn: &Connection, session: &mut Session, tasks: &mut Vec<Task>,
    ) -> bool {
        let req = match handshake::parse_request(&session.buffer) {
            Ok(Some(req)) if req.len <= self.max_handshake_size => req,
            Ok(None) if session.buffer.len() <= self.max_handshake_size => {
                return true;
            }

            // Requests exceeding the limit are rejected, whether complete or
            // not, since clients might otherwise send headers forever
            Ok(_) => {
                reject(conn, 431, "Request Header Fields Too Large");
                return false;
            }
            Err(err) => {
                tracing::debug!(id = conn.id(), %err, "malformed upgrade");
                reject(conn, 400, "Bad Request");
                return false;
            }
        };

        // Ensure request is a valid upgrade request
        let key = match req.headers.get("Sec-WebSocket-Key") {
            Some(key) if is_valid_upgrade_request(&req.headers) => key,
            _ => {
                reject(conn, 400, "Bad Request");
                return false;
            }
        };

        // Accept upgrade, and keep bytes following the request, which might
        // already contain frames if the client didn't wait for our response
        conn.write_raw(handshake::create_response(key).as_bytes());
        session.buffer.drain(..req.len);
        session.phase = Phase::Open;
        self.clients.insert(conn.clone());
        tracing::debug!(id = conn.id(), path = %req.path, "upgraded");

        // Emit open event and process remaining bytes
        tasks.push(self.emit(conn, "open", Payload::Empty));
        self.receive(conn, session, tasks)
    }

    /// Decodes and handles all complete frames in the receive buffer.
    ///
    /// Returns whether the session is still alive.
    fn receive(
        &self, conn: &Connection, session: &mut Session, tasks: &mut Vec<Task>,
    ) -> bool {
        loop {
            match self.decoder.decode_from(&mut session.buffer) {
                Ok(Some(frame)) => {
                    if !self.handle(conn, session, frame, tasks) {
                        return false;
                    }
                }
                Ok(None) => return true,

                // Oversized frames are fatal, as we can't skip their payload
                // without reading it, which is exactly what we must avoid
                Err(err @ DecodeError::FrameTooLarge { .. }) => {
                    tracing::warn!(id = conn.id(), %err, "closing connection");
                    tasks.push(self.emit_error(conn, &err));
                    let reason = "frame too large";
                    self.close(conn, CloseCode::TOO_BIG, reason, tasks);
                    return false;
                }

                // Other errors leave us without a way to find the start of
                // the next frame, so we discard everything received so far
                Err(err) => {
                    tracing::debug!(id = conn.id(), %err, "decoding failed");
                    session.buffer.clear();
                    session.fragment = None;
                    tasks.push(self.emit_error(conn, &err));
                    return true;
                }
            }
        }
    }

    /// Handles a frame.
    ///
    /// Returns whether the session is still alive.
    fn handle(
        &self, conn: &Connection, session: &mut Session, frame: Frame,
        tasks: &mut Vec<Task>,
    ) -> bool {
        match frame.opcode() {
            // Data frames start a new message, which is complete right away
            // unless the frame is the first fragment of the message
            opcode @ (OpCode::Text | OpCode::Binary) => {
                if session.fragment.take().is_some() {
                    let err = "fragmented message interrupted";
                    tasks.push(self.emit_error(conn, err));
                }
                if frame.is_fin() {
                    let payload = frame.into_payload();
                    tasks.push(self.message(conn, opcode, payload));
                } else {
                    let data = frame.into_payload();
                    session.fragment = Some(Fragment { opcode, data });
                }
            }

            // Continuation frames append to the current message
            OpCode::Continuation => {
                let Some(fragment) = session.fragment.as_mut() else {
                    let err = "unexpected continuation frame";
                    tasks.push(self.emit_error(conn, err));
                    return true;
                };
                fragment.data.extend_from_slice(frame.payload());
                if fragment.data.len() > self.max_message_size {
                    let err = "message too large";
                    tasks.push(self.emit_error(conn, err));
                    self.close(conn, CloseCode::TOO_BIG, err, tasks);
                    return false;
                }

                // Dispatch message once the last fragment arrived
                if frame.is_fin() {
                    if let Some(Fragment { opcode, data }) =
                        session.fragment.take()
                    {
                        tasks.push(self.message(conn, opcode, data));
                    }
                }
            }

            // Pings are answered without emitting an event, but only after
            // the listeners for preceding frames ran
            OpCode::Ping => {
                let conn = conn.clone();
                let pong = Frame::pong(frame.into_payload());
                tasks.push(defer(move || {
                    conn.send(&pong);
                }));
            }
            OpCode::Pong => {
                let payload = Payload::Binary(frame.into_payload());
                tasks.push(self.emit(conn, "pong", payload));
            }

            // Echo status code and reason, and close the connection
            OpCode::Close => {
                let reason = frame.close_reason();
                self.close(conn, frame.close_code(), &reason, tasks);
                return false;
            }
        }
        true
    }

    /// Dispatches a complete message.
    fn message(
        &self, conn: &Connection, opcode: OpCode, data: Vec<u8>,
    ) -> Task {
        // Unwrap named events sent as JSON envelope
        if let Ok(Value::Object(mut map)) = serde_json::from_slice(&data) {
            if let Some(Value::String(name)) = map.remove("event") {
                let data = map.remove("data").unwrap_or(Value::Null);
                return self.emit(conn, &name, Payload::Json(data));
            }
        }

        // Otherwise, dispatch raw message, with text that is not valid UTF-8
        // handed over as binary
        let payload = match opcode {
            OpCode::Text => match String::from_utf8(data) {
                Ok(text) => Payload::Text(text),
                Err(err) => Payload::Binary(err.into_bytes()),
            },
            _ => Payload::Binary(data),
        };
        self.emit(conn, "message", payload)
    }

    /// Closes the connection and emits the close event.
    ///
    /// Closing is deferred until the listeners for preceding frames ran, so
    /// their replies are sent before the close frame. The session is dropped
    /// right away, so no further frames are processed.
    fn close(
        &self, conn: &Connection, code: CloseCode, reason: &str,
        tasks: &mut Vec<Task>,
    ) {
        tasks.push(defer({
            let conn = conn.clone();
            let clients = self.clients.clone();
            let reason = reason.to_string();
            move || {
                conn.close(code, &reason);
                clients.remove(conn.id());
                tracing::debug!(id = conn.id(), %code, "closed");
            }
        }));

        // Emit close event
        let reason = reason.to_string();
        tasks.push(self.emit(conn, "close", Payload::Close { code, reason }));
    }
}

#[allow(clippy::must_use_candidate)]
impl Server {
    /// Returns the connected clients.
    #[inline]
    pub fn clients(&self) -> &Clients {
        &self.clients
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl Handler for Server {
    fn on_connect(&mut self, conn: &Connection) -> Task {
        self.sessions.insert(conn.id().to_string(), Session::new());
        Task::done()
    }

    fn on_data(&mut self, conn: &Connection, data: Vec<u8>) -> Task {
        let Some(mut session) = self.sessions.remove(conn.id()) else {
            return Task::done();
        };

        // Process bytes according to phase, and keep the session only if it
        // is still alive afterwards
        session.buffer.extend_from_slice(&data);
        let mut tasks = Vec::new();
        let alive = match session.phase {
            Phase::Handshake => self.handshake(conn, &mut session, &mut tasks),
            Phase::Open => self.receive(conn, &mut session, &mut tasks),
        };
        if alive {
            self.sessions.insert(conn.id().to_string(), session);
        }
        Task::sequence(tasks)
    }

    fn on_close(&mut self, conn: &Connection) -> Task {
        let Some(session) = self.sessions.remove(conn.id()) else {
            return Task::done();
        };
        if session.phase == Phase::Handshake {
            return Task::done();
        }

        // Connections closed by a listener carry a status, all others were
        // dropped by the peer without a close frame
        self.clients.remove(conn.id());
        let (code, reason) = conn
            .status()
            .unwrap_or((CloseCode::ABNORMAL, String::new()));
        tracing::debug!(id = conn.id(), %code, "disconnected");
        self.emit(conn, "close", Payload::Close { code, reason })
    }

    fn on_error(&mut self, conn: &Connection, err: BoxError) -> Task {
        tracing::warn!(id = conn.id(), %err, "listener failed");
        self.emit_error(conn, err)
    }
}

// ----------------------------------------------------------------------------

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Server")
            .field("dispatcher", &self.dispatcher)
            .field("sessions", &self.sessions.len())
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Creates a task running the given function once polled.
fn defer<F>(f: F) -> Task
where
    F: FnOnce() + 'static,
{
    Task::new(async move {
        f();
        Ok(())
    })
}

/// Rejects the upgrade request and disconnects.
fn reject(conn: &Connection, code: u16, message: &str) {
    tracing::debug!(id = conn.id(), code, "upgrade rejected");
    conn.write_raw(handshake::create_error_response(code, message).as_bytes());
    conn.disconnect();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_protocol::Encoder;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::task::Poll;

    /// Upgrade request with the sample nonce from RFC 6455.
    const UPGRADE: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    type Log = Rc<RefCell<Vec<(String, Payload)>>>;

    fn setup(config: &Config) -> (Server, Log) {
        let log = Log::default();
        let mut server = Server::new(config);
        for name in ["open", "message", "pong", "close", "error", "chat"] {
            let log = Rc::clone(&log);
            server.on(name, move |ctx| {
                let entry = (ctx.event().to_string(), ctx.payload().clone());
                log.borrow_mut().push(entry);
                Ok(())
            });
        }
        (server, log)
    }

    fn run(mut task: Task) {
        loop {
            match task.poll_once() {
                Poll::Ready(res) => return res.unwrap(),
                Poll::Pending => {}
            }
        }
    }

    fn connect(server: &mut Server) -> Connection {
        let conn = Connection::unbound();
        run(server.on_connect(&conn));
        run(server.on_data(&conn, UPGRADE.to_vec()));
        let output = conn.take_output();
        assert!(output.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));
        conn
    }

    fn send(server: &mut Server, conn: &Connection, frame: Frame) {
        let bytes = Encoder::encode(&frame.with_random_mask());
        run(server.on_data(conn, bytes));
    }

    fn frames(conn: &Connection) -> Vec<Frame> {
        let mut buffer = conn.take_output();
        let mut frames = Vec::new();
        while let Some(frame) = Decoder::new().decode_from(&mut buffer).unwrap()
        {
            frames.push(frame);
        }
        frames
    }

    fn events(log: &Log) -> Vec<String> {
        log.borrow().iter().map(|(name, _)| name.clone()).collect()
    }

    #[test]
    fn test_handshake() {
        let (mut server, log) = setup(&Config::default());
        let conn = Connection::unbound();
        run(server.on_connect(&conn));
        run(server.on_data(&conn, UPGRADE.to_vec()));

        // Response carries the accept key for the sample nonce
        let output = String::from_utf8(conn.take_output()).unwrap();
        assert!(output.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert_eq!(*log.borrow(), [("open".to_string(), Payload::Empty)]);
        assert_eq!(server.clients().len(), 1);
    }

    #[test]
    fn test_handshake_split_with_pipelined_frame() {
        let (mut server, log) = setup(&Config::default());
        let conn = Connection::unbound();
        run(server.on_connect(&conn));
        run(server.on_data(&conn, UPGRADE[..20].to_vec()));
        assert!(log.borrow().is_empty());

        // Send remaining request together with a frame
        let mut bytes = UPGRADE[20..].to_vec();
        let frame = Frame::text("early").with_random_mask();
        bytes.extend(Encoder::encode(&frame));
        run(server.on_data(&conn, bytes));
        assert_eq!(*log.borrow(), [
            ("open".to_string(), Payload::Empty),
            ("message".to_string(), Payload::Text("early".into())),
        ]);
    }

    #[test]
    fn test_handshake_invalid() {
        let (mut server, log) = setup(&Config::default());
        let conn = Connection::unbound();
        run(server.on_connect(&conn));
        let req = b"GET / HTTP/1.1\r\nUpgrade: Something-Else\r\n\r\n";
        run(server.on_data(&conn, req.to_vec()));

        // Connection is rejected without events
        assert_eq!(conn.take_output(), b"HTTP/1.1 400 Bad Request\r\n\r\n");
        assert!(!conn.is_connected());
        run(server.on_close(&conn));
        assert!(log.borrow().is_empty());
        assert!(server.clients().is_empty());
    }

    #[test]
    fn test_handshake_too_large() {
        let config = Config { max_handshake_size: 16, ..Default::default() };
        let (mut server, _) = setup(&config);
        let conn = Connection::unbound();
        run(server.on_connect(&conn));
        run(server.on_data(&conn, b"GET / HTTP/1.1\r\nX-Padding: ".to_vec()));
        let output = conn.take_output();
        assert!(output.starts_with(b"HTTP/1.1 431 "));
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_handshake_malformed() {
        let (mut server, _) = setup(&Config::default());
        let conn = Connection::unbound();
        run(server.on_connect(&conn));
        run(server.on_data(&conn, b"\x00\x01\x02 garbage\r\n\r\n".to_vec()));
        assert_eq!(conn.take_output(), b"HTTP/1.1 400 Bad Request\r\n\r\n");
    }

    #[test]
    fn test_ping_pong() {
        let (mut server, log) = setup(&Config::default());
        let conn = connect(&mut server);
        log.borrow_mut().clear();

        // Ping is answered with pong carrying the same payload
        send(&mut server, &conn, Frame::ping("abc"));
        assert_eq!(frames(&conn), [Frame::pong("abc")]);
        assert!(log.borrow().is_empty());

        // Pong is emitted as event
        send(&mut server, &conn, Frame::pong("xyz"));
        assert_eq!(*log.borrow(), [(
            "pong".to_string(),
            Payload::Binary(b"xyz".to_vec())
        )]);
    }

    #[test]
    fn test_close() {
        let (mut server, log) = setup(&Config::default());
        let conn = connect(&mut server);
        log.borrow_mut().clear();

        // Close frame is echoed, and connection is closed
        let code = CloseCode::GOING_AWAY;
        send(&mut server, &conn, Frame::close(code, "bye"));
        assert!(!conn.is_connected());
        assert_eq!(frames(&conn), [Frame::close(code, "bye")]);

        // Further frames and the engine's close notification are ignored
        send(&mut server, &conn, Frame::text("late"));
        run(server.on_close(&conn));
        let reason = String::from("bye");
        assert_eq!(*log.borrow(), [(
            "close".to_string(),
            Payload::Close { code, reason }
        )]);
        assert!(server.clients().is_empty());
    }

    #[test]
    fn test_peer_disconnect() {
        let (mut server, log) = setup(&Config::default());
        let conn = connect(&mut server);
        conn.disconnect();
        run(server.on_close(&conn));
        assert_eq!(events(&log), ["open", "close"]);
        assert_eq!(log.borrow()[1].1, Payload::Close {
            code: CloseCode::ABNORMAL,
            reason: String::new(),
        });
    }

    #[test]
    fn test_envelope() {
        let (mut server, log) = setup(&Config::default());
        let conn = connect(&mut server);
        log.borrow_mut().clear();

        // Named event is dispatched with its data
        let text = r#"{"event": "chat", "data": {"msg": "hi"}}"#;
        send(&mut server, &conn, Frame::text(text));
        let data = serde_json::json!({ "msg": "hi" });
        assert_eq!(log.borrow()[0], ("chat".into(), Payload::Json(data)));

        // Envelopes are dispatched under their name, whatever it is
        send(&mut server, &conn, Frame::text(r#"{"event":"close","data":1}"#));
        assert_eq!(log.borrow()[1].0, "close");
        assert_eq!(log.borrow()[1].1, Payload::Json(1.into()));
        assert!(conn.is_connected());

        // Everything else is dispatched as message
        send(&mut server, &conn, Frame::text("[1, 2]"));
        send(&mut server, &conn, Frame::text(r#"{"data": 1}"#));
        assert_eq!(log.borrow()[2].1, Payload::Text("[1, 2]".into()));
        assert_eq!(log.borrow()[3].1, Payload::Text(r#"{"data": 1}"#.into()));
    }

    #[test]
    fn test_invalid_utf8_text() {
        let (mut server, log) = setup(&Config::default());
        let conn = connect(&mut server);
        log.borrow_mut().clear();

        // Raw bytes are dispatched as message
        send(&mut server, &conn, Frame::new(true, OpCode::Text, vec![0xFF]));
        assert_eq!(*log.borrow(), [(
            "message".to_string(),
            Payload::Binary(vec![0xFF])
        )]);
    }

    #[test]
    fn test_frames_in_one_read_keep_order() {
        let (mut server, _) = setup(&Config::default());
        server.on("message", |ctx| {
            if let Some(text) = ctx.text() {
                ctx.conn().send_text(text);
            }
            Ok(())
        });
        let conn = connect(&mut server);

        // Reply to message precedes pong
        let mut bytes = Encoder::encode(&Frame::text("hi").with_random_mask());
        bytes.extend(Encoder::encode(&Frame::ping("p").with_random_mask()));
        run(server.on_data(&conn, bytes));
        assert_eq!(frames(&conn), [Frame::text("hi"), Frame::pong("p")]);

        // Reply to message precedes close
        let code = CloseCode::NORMAL;
        let mut bytes = Encoder::encode(&Frame::text("bye").with_random_mask());
        let close = Frame::close(code, "").with_random_mask();
        bytes.extend(Encoder::encode(&close));
        run(server.on_data(&conn, bytes));
        assert_eq!(frames(&conn), [Frame::text("bye"), Frame::close(code, "")]);
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_fragmented_message() {
        let (mut server, log) = setup(&Config::default());
        let conn = connect(&mut server);
        log.borrow_mut().clear();

        // Send message in three fragments
        send(&mut server, &conn, Frame::new(false, OpCode::Text, "Hel"));
        send(&mut server, &conn, Frame::new(false, OpCode::Continuation, "l"));
        send(&mut server, &conn, Frame::new(true, OpCode::Continuation, "o"));
        assert_eq!(*log.borrow(), [(
            "message".to_string(),
            Payload::Text("Hello".into())
        )]);

        // Continuation without preceding fragment is an error
        send(&mut server, &conn, Frame::new(true, OpCode::Continuation, "x"));
        assert_eq!(events(&log), ["message", "error"]);
    }

    #[test]
    fn test_decode_error_keeps_connection() {
        let (mut server, log) = setup(&Config::default());
        let conn = connect(&mut server);
        log.borrow_mut().clear();

        // Frame with reserved bits set
        run(server.on_data(&conn, vec![0xC1, 0x80, 0, 0, 0, 0]));
        assert_eq!(events(&log), ["error"]);
        assert!(conn.is_connected());

        // Connection continues to work
        send(&mut server, &conn, Frame::binary(vec![1, 2, 3]));
        assert_eq!(log.borrow()[1].1, Payload::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn test_frame_too_large() {
        let config = Config { max_frame_size: 4, ..Default::default() };
        let (mut server, log) = setup(&config);
        let conn = connect(&mut server);
        log.borrow_mut().clear();

        // Connection is closed with status code 1009
        send(&mut server, &conn, Frame::text("too large"));
        assert!(!conn.is_connected());
        assert_eq!(frames(&conn)[0].close_code(), CloseCode::TOO_BIG);
        assert_eq!(events(&log), ["error", "close"]);
    }

    #[test]
    fn test_listener_error() {
        let (mut server, log) = setup(&Config::default());
        let conn = connect(&mut server);
        log.borrow_mut().clear();
        run(server.on_error(&conn, "boom".into()));
        assert_eq!(*log.borrow(), [(
            "error".to_string(),
            Payload::Error("boom".into())
        )]);
    }

    #[test]
    fn test_broadcast_filter() {
        let (mut server, _) = setup(&Config::default());
        let conns: Vec<_> = (0..3).map(|_| connect(&mut server)).collect();

        // Disconnect first, and exclude second connection by filter
        conns[0].disconnect();
        let excluded = conns[1].id().to_string();
        let count = server.broadcast_with("x", |conn| conn.id() != excluded);
        assert_eq!(count, 1);
        assert_eq!(frames(&conns[2]), [Frame::text("x")]);
        assert!(frames(&conns[1]).is_empty());
    }
}
