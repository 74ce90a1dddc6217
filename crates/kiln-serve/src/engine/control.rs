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

//! Engine controller.

use crossbeam::channel::Sender;
use mio::Waker;
use std::sync::Arc;

use super::error::Result;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Command sent to a running engine.
#[derive(Debug)]
pub enum Control {
    /// Stop the engine.
    Stop,
}

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Engine controller.
///
/// The engine and everything it owns live on a single thread, so other
/// threads can only interact with it through a controller, which sends a
/// command and wakes the engine from polling.
#[derive(Clone, Debug)]
pub struct Controller {
    /// Command sender.
    sender: Sender<Control>,
    /// Waker for the engine's poller.
    waker: Arc<Waker>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Controller {
    /// Creates a controller.
    pub(crate) fn new(sender: Sender<Control>, waker: Arc<Waker>) -> Self {
        Self { sender, waker }
    }

    /// Asks the engine to stop.
    ///
    /// The engine stops at the beginning of its next tick, which happens
    /// immediately, since the engine is woken up.
    ///
    /// # Errors
    ///
    /// This method returns [`Error::Disconnected`][] if the engine is gone,
    /// and [`Error::Io`][] if it could not be woken up.
    ///
    /// [`Error::Disconnected`]: super::Error::Disconnected
    /// [`Error::Io`]: super::Error::Io
    pub fn stop(&self) -> Result {
        self.sender.send(Control::Stop)?;
        self.waker.wake().map_err(Into::into)
    }
}
