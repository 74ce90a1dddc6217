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

//! Event dispatcher.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use super::engine::{Task, TaskResult};

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Event dispatcher.
///
/// Listeners are registered under an event name, and invoked in registration
/// order when an event with that name is dispatched. Dispatching does not run
/// listeners right away, but returns a [`Task`] that runs them one after
/// another once the engine polls it, so a suspending listener delays the ones
/// registered after it.
///
/// # Examples
///
/// ```
/// use kiln_serve::dispatcher::Dispatcher;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// // Create dispatcher and register listener
/// let count = Rc::new(Cell::new(0));
/// let mut dispatcher = Dispatcher::new();
/// dispatcher.on("tick", {
///     let count = Rc::clone(&count);
///     move |n: u32| {
///         count.set(count.get() + n);
///         Ok(())
///     }
/// });
///
/// // Dispatch event and run listeners
/// let mut task = dispatcher.dispatch("tick", 2);
/// assert!(task.poll_once().is_ready());
/// assert_eq!(count.get(), 2);
/// ```
pub struct Dispatcher<T> {
    /// Listeners by event name.
    listeners: HashMap<String, Vec<Listener<T>>>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl<T> Dispatcher<T>
where
    T: Clone + 'static,
{
    /// Creates an event dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self { listeners: HashMap::new() }
    }

    /// Registers a synchronous listener for the given event.
    pub fn on<N, F>(&mut self, name: N, f: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(T) -> TaskResult + 'static,
    {
        self.add(name.into(), Rc::new(move |arg| Task::ready(f(arg))))
    }

    /// Registers an asynchronous listener for the given event.
    ///
    /// The future returned by the listener may suspend, e.g., by awaiting
    /// [`yield_now`][], and is resumed on the next tick of the engine.
    ///
    /// [`yield_now`]: crate::engine::yield_now
    pub fn on_async<N, F, R>(&mut self, name: N, f: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(T) -> R + 'static,
        R: Future<Output = TaskResult> + 'static,
    {
        self.add(name.into(), Rc::new(move |arg| Task::new(f(arg))))
    }

    /// Removes all listeners for the given event.
    ///
    /// Returns whether there were any listeners.
    pub fn off(&mut self, name: &str) -> bool {
        self.listeners.remove(name).is_some()
    }

    /// Dispatches an event to its listeners.
    ///
    /// The returned task runs all listeners in registration order. A failing
    /// listener does not prevent the remaining listeners from running, and
    /// the first error is returned once all of them completed.
    pub fn dispatch(&self, name: &str, arg: T) -> Task {
        let Some(listeners) = self.listeners.get(name) else {
            return Task::done();
        };

        // Defer invocation of each listener until the task is polled
        let iter = listeners.iter().map(|listener| {
            let listener = Rc::clone(listener);
            let arg = arg.clone();
            Task::new(async move { listener(arg).await })
        });
        Task::sequence(iter.collect())
    }

    /// Registers a listener.
    fn add(&mut self, name: String, listener: Listener<T>) -> &mut Self {
        self.listeners.entry(name).or_default().push(listener);
        self
    }
}

#[allow(clippy::must_use_candidate)]
impl<T> Dispatcher<T> {
    /// Returns whether the given event has listeners.
    #[inline]
    pub fn has_listeners(&self, name: &str) -> bool {
        self.listeners.get(name).is_some_and(|list| !list.is_empty())
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl<T> Default for Dispatcher<T>
where
    T: Clone + 'static,
{
    /// Creates an event dispatcher.
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------

impl<T> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<_> = self.listeners.keys().collect();
        names.sort();
        f.debug_struct("Dispatcher")
            .field("events", &names)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Type aliases
// ----------------------------------------------------------------------------

/// Listener, type-erased to a function returning a task.
type Listener<T> = Rc<dyn Fn(T) -> Task>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
