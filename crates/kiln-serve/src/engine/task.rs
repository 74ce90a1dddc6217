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

//! Cooperative task.

use std::error;
use std::fmt;
use std::future::{self, Future};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Cooperative task.
///
/// Tasks are the unit of execution of the [`Engine`][]. Every event on a
/// connection is handled in a task, which runs until it completes, fails, or
/// suspends. Suspended tasks are resumed on every tick of the engine, and as
/// there's only one thread, no two tasks ever run at the same time.
///
/// [`Engine`]: crate::engine::Engine
///
/// # Examples
///
/// ```
/// use kiln_serve::engine::{yield_now, Task};
/// use std::task::Poll;
///
/// // Create task that suspends once
/// let mut task = Task::new(async {
///     yield_now().await;
///     Ok(())
/// });
///
/// // Run task to completion
/// assert!(task.poll_once().is_pending());
/// assert!(matches!(task.poll_once(), Poll::Ready(Ok(()))));
/// ```
pub struct Task {
    /// Task body.
    future: Pin<Box<dyn Future<Output = TaskResult>>>,
}

/// Future returned by [`yield_now`].
#[derive(Debug, Default)]
pub struct YieldNow {
    /// Whether the future has already suspended.
    yielded: bool,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Task {
    /// Creates a task from the given future.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = TaskResult> + 'static,
    {
        Self { future: Box::pin(future) }
    }

    /// Creates a task that completes with the given result.
    #[inline]
    #[must_use]
    pub fn ready(res: TaskResult) -> Self {
        Self::new(future::ready(res))
    }

    /// Creates a task that completes successfully.
    #[inline]
    #[must_use]
    pub fn done() -> Self {
        Self::ready(Ok(()))
    }

    /// Creates a task running the given tasks one after another.
    ///
    /// A failing task does not prevent the remaining tasks from running. The
    /// first error is returned once all tasks completed, and all subsequent
    /// errors are only logged.
    #[must_use]
    pub fn sequence(tasks: Vec<Task>) -> Self {
        Self::new(async move {
            let mut res = Ok(());
            for task in tasks {
                if let Err(err) = task.await {
                    if res.is_ok() {
                        res = Err(err);
                    } else {
                        tracing::warn!(%err, "task failed");
                    }
                }
            }
            res
        })
    }

    /// Resumes the task until it completes or suspends.
    ///
    /// The engine resumes suspended tasks on every tick regardless of wakeups,
    /// so tasks are polled with a waker that does nothing.
    pub fn poll_once(&mut self) -> Poll<TaskResult> {
        let mut cx = Context::from_waker(Waker::noop());
        self.future.as_mut().poll(&mut cx)
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl Future for Task {
    type Output = TaskResult;

    #[inline]
    fn poll(
        mut self: Pin<&mut Self>, cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

// ----------------------------------------------------------------------------

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Suspends the current task until the next tick of the engine.
///
/// Long-running listeners should call this periodically, since the engine
/// cannot preempt a task and is blocked for as long as it runs.
#[inline]
#[must_use]
pub fn yield_now() -> YieldNow {
    YieldNow::default()
}

// ----------------------------------------------------------------------------
// Type aliases
// ----------------------------------------------------------------------------

/// Error raised inside a task.
pub type BoxError = Box<dyn error::Error>;

/// Task result.
pub type TaskResult = Result<(), BoxError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_ready() {
        assert!(matches!(Task::done().poll_once(), Poll::Ready(Ok(()))));
        let mut task = Task::ready(Err("boom".into()));
        match task.poll_once() {
            Poll::Ready(Err(err)) => assert_eq!(err.to_string(), "boom"),
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn test_sequence_runs_all() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let tasks = (0..3)
            .map(|n| {
                let log = Rc::clone(&log);
                Task::new(async move {
                    log.borrow_mut().push(n);
                    let res: TaskResult =
                        if n == 1 { Err("first".into()) } else { Ok(()) };
                    res
                })
            })
            .collect();

        // All tasks run, and the first error is reported
        match Task::sequence(tasks).poll_once() {
            Poll::Ready(Err(err)) => assert_eq!(err.to_string(), "first"),
            _ => panic!("expected failure"),
        }
        assert_eq!(*log.borrow(), [0, 1, 2]);
    }

    #[test]
    fn test_sequence_suspends() {
        let tasks = vec![
            Task::new(async {
                yield_now().await;
                yield_now().await;
                Ok(())
            }),
            Task::done(),
        ];
        let mut task = Task::sequence(tasks);
        assert!(task.poll_once().is_pending());
        assert!(task.poll_once().is_pending());
        assert!(task.poll_once().is_ready());
    }
}
