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

//! Connected clients.

use kiln_protocol::Frame;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::Connection;

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Connected clients.
///
/// Clients are connections that completed the upgrade handshake, and are
/// keyed by connection identifier. The server adds and removes clients, and
/// hands out clones of this handle, which share the same registry, to every
/// listener through its [`Context`][].
///
/// [`Context`]: super::Context
#[derive(Clone, Debug, Default)]
pub struct Clients {
    /// Connections by identifier.
    inner: Rc<RefCell<HashMap<String, Connection>>>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Clients {
    /// Sends a text message to all clients.
    ///
    /// Returns the number of clients the message was sent to.
    pub fn broadcast(&self, text: &str) -> usize {
        self.broadcast_with(text, |_| true)
    }

    /// Sends a text message to all clients matching the filter.
    ///
    /// Disconnected clients are skipped without invoking the filter. The
    /// frame is created once, and each send encodes it into the outbox of
    /// the respective connection. Returns the number of clients the message
    /// was sent to.
    pub fn broadcast_with<F>(&self, text: &str, mut filter: F) -> usize
    where
        F: FnMut(&Connection) -> bool,
    {
        let frame = Frame::text(text);
        let mut count = 0;
        for conn in self.to_vec() {
            if conn.is_connected() && filter(&conn) && conn.send(&frame) {
                count += 1;
            }
        }
        count
    }

    /// Returns the client with the given identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Connection> {
        self.inner.borrow().get(id).cloned()
    }

    /// Returns all clients, in no particular order.
    ///
    /// Clients are returned as a snapshot, so the filter of a broadcast, or
    /// the caller, may freely send to them while iterating.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Connection> {
        self.inner.borrow().values().cloned().collect()
    }

    /// Adds a client.
    pub(crate) fn insert(&self, conn: Connection) {
        let id = conn.id().to_string();
        self.inner.borrow_mut().insert(id, conn);
    }

    /// Removes a client.
    pub(crate) fn remove(&self, id: &str) -> Option<Connection> {
        self.inner.borrow_mut().remove(id)
    }
}

#[allow(clippy::must_use_candidate)]
impl Clients {
    /// Returns the number of clients.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Returns whether there are no clients.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
