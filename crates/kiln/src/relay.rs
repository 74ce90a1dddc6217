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

//! Relay listeners.

use kiln_protocol::CloseCode;
use kiln_serve::server::{Context, Payload};
use kiln_serve::{Config, Server};
use serde_json::json;

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Creates a server relaying messages between clients.
pub fn server(config: &Config) -> Server {
    let mut server = Server::new(config);
    server
        .on("open", |ctx| {
            let addr = ctx.conn().remote_addr();
            tracing::info!(id = ctx.conn().id(), %addr, "client joined");
            let clients = ctx.clients().len();
            ctx.conn().send_event("welcome", &json!({ "clients": clients }))?;
            Ok(())
        })
        .on("message", relay_message)
        .on("close", |ctx| {
            if let Payload::Close { code, reason } = ctx.payload() {
                let id = ctx.conn().id();
                tracing::info!(id, %code, %reason, "client left");
            }
            Ok(())
        })
        .on("error", |ctx| {
            if let Payload::Error(err) = ctx.payload() {
                tracing::warn!(id = ctx.conn().id(), %err, "client error");
            }
            Ok(())
        });

    // Named events are relayed to everyone, including the sender
    for name in ["chat", "presence"] {
        server.on(name, move |ctx| {
            let text = json!({ "event": name, "data": ctx.data() }).to_string();
            ctx.clients().broadcast(&text);
            Ok(())
        });
    }

    // Clients may ask to be disconnected
    server.on("quit", |ctx| {
        ctx.conn().close(CloseCode::NORMAL, "bye");
        Ok(())
    });
    server
}

/// Relays a message to all clients except the sender.
#[allow(clippy::needless_pass_by_value, clippy::unnecessary_wraps)]
fn relay_message(ctx: Context) -> kiln_serve::engine::TaskResult {
    let sender = ctx.conn().id();
    let relayed = match ctx.payload() {
        Payload::Text(text) => {
            ctx.clients().broadcast_with(text, |conn| conn.id() != sender)
        }
        _ => 0,
    };
    tracing::debug!(id = sender, relayed, "message relayed");
    Ok(())
}
