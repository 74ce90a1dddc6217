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

//! End-to-end tests against an independent WebSocket client.

use crossbeam::channel;
use kiln_serve::engine::{yield_now, BoxError, Controller, Engine};
use kiln_serve::{Config, Server};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::Message;

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Spawns an engine running an echo server on a random port.
fn spawn(
    closed: Arc<AtomicUsize>,
) -> (SocketAddr, Controller, JoinHandle<kiln_serve::engine::Result>) {
    let (sender, receiver) = channel::bounded(1);
    let handle = thread::spawn(move || {
        let config = Config { port: 0, ..Default::default() };
        let mut server = Server::new(&config);
        server
            .on("message", |ctx| {
                if let Some(text) = ctx.text() {
                    ctx.conn().send_text(text);
                }
                Ok(())
            })
            .on_async("chat", |ctx| async move {
                yield_now().await;
                ctx.conn().send_event("chat", &ctx.data())?;
                Ok::<_, BoxError>(())
            })
            .on("close", move |_| {
                closed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        // Create engine and report address and controller
        let mut engine = Engine::new(server, &config)?;
        engine.listen(config.addr())?;
        let _ = sender.send((engine.local_addr()?, engine.controller()));
        engine.run()
    });
    let (addr, controller) = receiver.recv().unwrap();
    (addr, controller, handle)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[test]
fn test_echo_ping_close() {
    let closed = Arc::new(AtomicUsize::new(0));
    let (addr, controller, handle) = spawn(Arc::clone(&closed));

    // Connect client and perform handshake
    let stream = TcpStream::connect(addr).unwrap();
    let url = format!("ws://{addr}/");
    let (mut socket, res) = tungstenite::client(url, stream).unwrap();
    assert_eq!(res.status(), 101);

    // Text messages are echoed
    socket.send(Message::text("hello")).unwrap();
    assert_eq!(socket.read().unwrap(), Message::text("hello"));

    // Named events are answered after suspending
    socket.send(Message::text(r#"{"event":"chat","data":"hi"}"#)).unwrap();
    let expected = r#"{"event":"chat","data":"hi"}"#;
    assert_eq!(socket.read().unwrap(), Message::text(expected));

    // Pings are answered with pongs
    socket.send(Message::Ping("abc".into())).unwrap();
    assert_eq!(socket.read().unwrap(), Message::Pong("abc".into()));

    // Close handshake is echoed
    let frame = CloseFrame { code: CloseCode::Away, reason: "bye".into() };
    socket.close(Some(frame)).unwrap();
    match socket.read().unwrap() {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Away);
            assert_eq!(frame.reason.as_str(), "bye");
        }
        msg => panic!("unexpected message: {msg:?}"),
    }

    // Stop engine
    controller.stop().unwrap();
    handle.join().unwrap().unwrap();
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_rejected_upgrade() {
    let (addr, controller, handle) = spawn(Arc::default());

    // Send request that is not an upgrade
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
    let mut res = String::new();
    stream.read_to_string(&mut res).unwrap();
    assert_eq!(res, "HTTP/1.1 400 Bad Request\r\n\r\n");

    // Stop engine
    controller.stop().unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn test_stop_closes_clients() {
    let (addr, controller, handle) = spawn(Arc::default());
    let stream = TcpStream::connect(addr).unwrap();
    let url = format!("ws://{addr}/");
    let (mut socket, _) = tungstenite::client(url, stream).unwrap();

    // Stopping the engine sends going away to every client
    controller.stop().unwrap();
    handle.join().unwrap().unwrap();
    match socket.read().unwrap() {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Away);
        }
        msg => panic!("unexpected message: {msg:?}"),
    }
}
