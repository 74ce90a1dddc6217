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

//! Listener context.

use kiln_protocol::CloseCode;
use serde_json::Value;
use std::rc::Rc;

use crate::engine::Connection;

use super::clients::Clients;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Event payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// No payload, used for `open`.
    Empty,
    /// Text message.
    Text(String),
    /// Binary message or pong payload.
    Binary(Vec<u8>),
    /// Data of a named event sent as JSON envelope.
    Json(Value),
    /// Status code and reason, used for `close`.
    Close {
        /// Status code.
        code: CloseCode,
        /// Reason.
        reason: String,
    },
    /// Error message, used for `error`.
    Error(String),
}

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Listener context.
///
/// Every listener receives a context, which carries the connection the event
/// originated from, the clients of the server, e.g., for broadcasting, and
/// the name and payload of the event.
#[derive(Clone, Debug)]
pub struct Context {
    /// Connection.
    conn: Connection,
    /// Connected clients.
    clients: Clients,
    /// Event name.
    event: Rc<str>,
    /// Event payload.
    payload: Payload,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Context {
    /// Creates a listener context.
    pub(crate) fn new(
        conn: Connection, clients: Clients, event: &str, payload: Payload,
    ) -> Self {
        Self { conn, clients, event: event.into(), payload }
    }
}

#[allow(clippy::must_use_candidate)]
impl Context {
    /// Returns the connection.
    #[inline]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Returns the connected clients.
    #[inline]
    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Returns the event name.
    #[inline]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Returns the event payload.
    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the payload as text, if it is a text message.
    #[inline]
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the payload as JSON, if it is the data of a named event.
    #[inline]
    pub fn data(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }
}
