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

//! Readiness engine.

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use mio::net::TcpListener;
use mio::{Interest, Registry, Token};
use slab::Slab;
use std::collections::VecDeque;
use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;

use kiln_protocol::CloseCode;

use super::config::Config;

mod connection;
mod control;
mod error;
mod poller;
mod task;

pub use connection::Connection;
pub use control::{Control, Controller};
pub use error::{Error, Result};
use poller::{Poller, LISTENER, WAKER};
pub use task::{yield_now, BoxError, Task, TaskResult, YieldNow};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Maximum number of events queued per connection before reading pauses.
const MAX_PENDING: usize = 32;

/// Maximum number of buffer fills read from a connection at once.
const READ_CHUNKS: usize = 16;

/// Poll timeout while tasks are suspended or data is left unread.
const YIELD_TIMEOUT: Duration = Duration::from_millis(1);

// ----------------------------------------------------------------------------
// Traits
// ----------------------------------------------------------------------------

/// Handler for connection events.
///
/// Every method returns a [`Task`], which the engine runs to completion before
/// starting the task for the next event on the same connection, so a handler
/// sees the events of a connection strictly in order.
pub trait Handler {
    /// Handles a newly accepted connection.
    fn on_connect(&mut self, conn: &Connection) -> Task;

    /// Handles bytes read from a connection.
    fn on_data(&mut self, conn: &Connection, data: Vec<u8>) -> Task;

    /// Handles a connection that was closed by either side.
    fn on_close(&mut self, conn: &Connection) -> Task;

    /// Handles an error raised by one of the other tasks.
    ///
    /// Errors raised by the returned task itself are only logged.
    fn on_error(&mut self, conn: &Connection, err: BoxError) -> Task;
}

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Engine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Engine was created, but is not listening.
    Idle,
    /// Engine is listening, but not running.
    Listening,
    /// Engine is running its loop.
    Running,
    /// Engine was stopped, which is final.
    Stopped,
}

/// Event on a connection.
enum Event {
    /// Connection was accepted.
    Connect,
    /// Bytes were read.
    Data(Vec<u8>),
    /// Connection was closed.
    Close,
}

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Readiness engine.
///
/// The engine accepts connections on a single listening socket, reads from
/// and writes to connections as they become ready, and hands everything that
/// happens to a [`Handler`]. It runs on a single thread: the handler and the
/// tasks it creates are never run concurrently, and may thus share state
/// through [`Rc`] and [`RefCell`][] without synchronization.
///
/// Each connection has its own queue of events. The task for an event is
/// created once the task of the previous event completed, and suspended tasks
/// are resumed on every tick, which is why the engine polls without timeout
/// while any task is suspended.
///
/// [`RefCell`]: std::cell::RefCell
///
/// # Examples
///
/// ```no_run
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// use kiln_serve::config::Config;
/// use kiln_serve::engine::{BoxError, Connection, Engine, Handler, Task};
///
/// // Handler that echoes everything back
/// struct Echo;
///
/// impl Handler for Echo {
///     fn on_connect(&mut self, _: &Connection) -> Task {
///         Task::done()
///     }
///     fn on_data(&mut self, conn: &Connection, data: Vec<u8>) -> Task {
///         conn.send_binary(data);
///         Task::done()
///     }
///     fn on_close(&mut self, _: &Connection) -> Task {
///         Task::done()
///     }
///     fn on_error(&mut self, _: &Connection, _: BoxError) -> Task {
///         Task::done()
///     }
/// }
///
/// // Create engine and run it
/// let mut engine = Engine::new(Echo, &Config::default())?;
/// engine.listen("127.0.0.1:8080")?;
/// engine.run()?;
/// # Ok(())
/// # }
/// ```
pub struct Engine<H>
where
    H: Handler,
{
    /// Handler for connection events.
    handler: H,
    /// Poller for I/O events.
    poller: Poller,
    /// Registry shared with connections.
    registry: Rc<Registry>,
    /// Listening socket.
    listener: Option<TcpListener>,
    /// Connection slots, indexed by token.
    slots: Slab<Slot>,
    /// Command sender, handed out to controllers.
    sender: Sender<Control>,
    /// Command receiver.
    receiver: Receiver<Control>,
    /// Read buffer.
    buffer: Vec<u8>,
    /// Timeout for polling.
    timeout: Duration,
    /// Engine state.
    state: State,
}

/// Connection slot.
struct Slot {
    /// Connection.
    conn: Connection,
    /// Events waiting for the active task to complete.
    pending: VecDeque<Event>,
    /// Active task.
    active: Option<Active>,
    /// Whether the close event was queued.
    closed: bool,
    /// Whether data was left in the socket.
    unread: bool,
}

/// Active task of a connection.
struct Active {
    /// Task.
    task: Task,
    /// Whether the task handles an error.
    recovery: bool,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl<H> Engine<H>
where
    H: Handler,
{
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// This method returns [`Error::Io`] if the poller cannot be created.
    pub fn new(handler: H, config: &Config) -> Result<Self> {
        let poller = Poller::with_capacity(config.events_capacity)?;
        let registry = Rc::new(poller.registry()?);
        let (sender, receiver) = channel::unbounded();
        Ok(Self {
            handler,
            poller,
            registry,
            listener: None,
            slots: Slab::new(),
            sender,
            receiver,
            buffer: vec![0; config.read_buffer_size.max(1)],
            timeout: config.poll_timeout(),
            state: State::Idle,
        })
    }

    /// Binds the listening socket to the given address.
    ///
    /// If the address resolves to several socket addresses, the first one
    /// that can be bound is used.
    ///
    /// # Errors
    ///
    /// This method returns [`Error::InvalidState`] if the engine is not idle,
    /// [`Error::NoAddress`] if the address resolves to nothing, and
    /// [`Error::Io`] if binding fails.
    pub fn listen<A>(&mut self, addr: A) -> Result
    where
        A: ToSocketAddrs,
    {
        if self.state != State::Idle {
            return Err(Error::InvalidState(self.state.as_str()));
        }

        // Bind to the first address that works, and keep the last error
        let mut res = Err(Error::NoAddress);
        for addr in addr.to_socket_addrs()? {
            match TcpListener::bind(addr) {
                Ok(listener) => {
                    res = Ok(listener);
                    break;
                }
                Err(err) => res = Err(err.into()),
            }
        }

        // Register listener with poller
        let mut listener = res?;
        self.poller.register(&mut listener, LISTENER, Interest::READABLE)?;
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "listening");
        }
        self.listener = Some(listener);
        self.state = State::Listening;
        Ok(())
    }

    /// Runs the engine until it is stopped.
    ///
    /// # Errors
    ///
    /// This method returns [`Error::NotListening`] if [`Engine::listen`] was
    /// not called, and [`Error::Io`] if polling fails.
    pub fn run(&mut self) -> Result {
        if self.state != State::Listening {
            return Err(Error::NotListening);
        }

        // Tick until stopped by a controller or a handler
        self.state = State::Running;
        while self.state == State::Running {
            self.tick(Some(self.timeout))?;
        }
        Ok(())
    }

    /// Runs a single iteration of the engine.
    ///
    /// An iteration waits up to the given timeout for readiness events, then
    /// accepts connections, reads and writes, and advances tasks. If a task is
    /// suspended, the engine does not wait at all.
    ///
    /// # Errors
    ///
    /// This method returns [`Error::Io`] if polling fails.
    pub fn tick(&mut self, timeout: Option<Duration>) -> Result {
        if self.state == State::Stopped || self.receive() {
            return Ok(());
        }

        // Resume reading from connections that caught up with their events,
        // as the socket won't report readiness for data it already has
        let unread: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.unread && slot.can_read())
            .map(|(key, _)| key)
            .collect();
        for key in unread {
            self.read(key);
        }

        // Don't block while tasks are waiting to be resumed
        let busy = self.slots.iter().any(|(_, slot)| slot.is_busy());
        let timeout = poll_timeout(timeout, busy);

        // Handle readiness events
        for readiness in self.poller.poll(timeout)? {
            match readiness.token {
                WAKER => {}
                LISTENER => self.accept(),
                Token(key) => {
                    if readiness.readable {
                        self.read(key);
                    }
                    if readiness.writable {
                        if let Some(slot) = self.slots.get(key) {
                            slot.conn.flush();
                        }
                    }
                }
            }
        }

        // Commands might have arrived while polling
        if self.receive() {
            return Ok(());
        }
        self.advance();
        Ok(())
    }

    /// Stops the engine.
    ///
    /// All connections are closed with [`CloseCode::GOING_AWAY`], and tasks
    /// and events that are still pending are dropped without running them.
    /// The listening socket is released, and stopping again does nothing.
    pub fn stop(&mut self) {
        if self.state == State::Stopped {
            return;
        }

        // Close connections and release listener
        for slot in self.slots.drain() {
            slot.conn.close(CloseCode::GOING_AWAY, "server shutting down");
        }
        if let Some(mut listener) = self.listener.take() {
            if let Err(err) = self.poller.deregister(&mut listener) {
                tracing::warn!(%err, "deregistering listener failed");
            }
        }
        self.state = State::Stopped;
        tracing::info!("stopped");
    }

    /// Returns a controller for stopping the engine from another thread.
    #[must_use]
    pub fn controller(&self) -> Controller {
        Controller::new(self.sender.clone(), self.poller.waker())
    }

    /// Returns the address of the listening socket.
    ///
    /// # Errors
    ///
    /// This method returns [`Error::NotListening`] if the engine does not
    /// listen, and [`Error::Io`] if the address cannot be determined.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr().map_err(Into::into),
            None => Err(Error::NotListening),
        }
    }

    /// Handles commands received from controllers.
    ///
    /// Returns whether the engine was stopped.
    fn receive(&mut self) -> bool {
        match self.receiver.try_recv() {
            Ok(Control::Stop) => {
                self.stop();
                true
            }
            // Disconnection can't happen, as we own a sender ourselves
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
        }
    }

    /// Accepts incoming connections.
    fn accept(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };

        // Accept new connections - note that we need to run this in a loop,
        // as the listener is edge-triggered and clients connect in bursts
        loop {
            match listener.accept() {
                Ok((socket, addr)) => {
                    let entry = self.slots.vacant_entry();
                    let conn = Connection::new(
                        socket,
                        addr,
                        Rc::clone(&self.registry),
                        Token(entry.key()),
                    );
                    if let Err(err) = conn.register() {
                        tracing::warn!(%err, %addr, "registration failed");
                        continue;
                    }

                    // Queue connect event for the new connection
                    tracing::debug!(id = conn.id(), %addr, "accepted");
                    entry.insert(Slot {
                        conn,
                        pending: VecDeque::from([Event::Connect]),
                        active: None,
                        closed: false,
                        unread: false,
                    });
                }

                // Would block means we accepted everything for now
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}

                // Errors like aborted connections only affect a single peer,
                // so we log them and try again on the next readiness event
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    break;
                }
            }
        }
    }

    /// Reads everything available from a connection.
    ///
    /// The connection is detached on end of stream or error, and the close
    /// event is queued once all previously read data was handled.
    fn read(&mut self, key: usize) {
        let Some(slot) = self.slots.get_mut(key) else {
            return;
        };

        // Leave data in the socket while the connection is backed up
        if !slot.conn.is_connected() {
            slot.unread = false;
            return;
        }
        slot.unread = !slot.can_read();
        if slot.unread {
            return;
        }

        // Drain the socket, since readiness is edge-triggered, but stop after
        // a bounded number of chunks and pick up the rest in the next tick
        let mut data = Vec::new();
        let mut chunks = 0;
        let eof = loop {
            if chunks == READ_CHUNKS {
                slot.unread = true;
                break false;
            }
            match slot.conn.read(&mut self.buffer) {
                Ok(0) => break true,
                Ok(n) => {
                    data.extend_from_slice(&self.buffer[..n]);
                    chunks += 1;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break false,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    tracing::debug!(id = slot.conn.id(), %err, "read failed");
                    break true;
                }
            }
        };

        // Queue data before detaching, so it's handled before closing
        if !data.is_empty() {
            slot.pending.push_back(Event::Data(data));
        }
        if eof {
            tracing::debug!(id = slot.conn.id(), "peer disconnected");
            slot.conn.detach();
        }
    }

    /// Advances the tasks of all connections.
    ///
    /// Tasks that complete immediately let the next event of the connection
    /// start in the same tick. Connections are removed once they are closed
    /// and all of their events were handled.
    fn advance(&mut self) {
        let mut finished = Vec::new();
        for (key, slot) in &mut self.slots {
            loop {
                if slot.active.is_none() {
                    // Queue close event once the connection is gone, which
                    // also covers connections closed by tasks
                    if !slot.closed && !slot.conn.is_connected() {
                        slot.closed = true;
                        slot.pending.push_back(Event::Close);
                    }

                    // Start task for next event, if any
                    let Some(event) = slot.pending.pop_front() else {
                        break;
                    };
                    let task = match event {
                        Event::Connect => self.handler.on_connect(&slot.conn),
                        Event::Data(data) => {
                            self.handler.on_data(&slot.conn, data)
                        }
                        Event::Close => self.handler.on_close(&slot.conn),
                    };
                    slot.active = Some(Active { task, recovery: false });
                }

                // Resume active task
                let Some(active) = slot.active.as_mut() else {
                    break;
                };
                match active.task.poll_once() {
                    Poll::Pending => break,
                    Poll::Ready(Ok(())) => slot.active = None,

                    // Hand errors to the handler, unless the failing task was
                    // already handling an error, in which case we log it
                    Poll::Ready(Err(err)) => {
                        if active.recovery {
                            let id = slot.conn.id();
                            tracing::warn!(id, %err, "error handler failed");
                            slot.active = None;
                        } else {
                            let task = self.handler.on_error(&slot.conn, err);
                            slot.active = Some(Active { task, recovery: true });
                        }
                    }
                }
            }

            // Connection is done once closed and idle
            if slot.closed && slot.active.is_none() && slot.pending.is_empty() {
                finished.push(key);
            }
        }

        // Remove finished connections
        for key in finished {
            let slot = self.slots.remove(key);
            tracing::debug!(id = slot.conn.id(), "removed");
        }
    }
}

#[allow(clippy::must_use_candidate)]
impl<H> Engine<H>
where
    H: Handler,
{
    /// Returns a reference to the handler.
    #[inline]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Returns a mutable reference to the handler.
    #[inline]
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Returns the engine state.
    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the number of connections.
    #[inline]
    pub fn connections(&self) -> usize {
        self.slots.len()
    }
}

// ----------------------------------------------------------------------------

impl Slot {
    /// Returns whether the slot has a suspended task or unread data.
    #[inline]
    fn is_busy(&self) -> bool {
        self.active.is_some() || self.unread
    }

    /// Returns whether more events may be queued.
    #[inline]
    fn can_read(&self) -> bool {
        self.pending.len() < MAX_PENDING
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Returns the poll timeout, which is capped while the engine is busy.
fn poll_timeout(timeout: Option<Duration>, busy: bool) -> Option<Duration> {
    if busy {
        Some(timeout.map_or(YIELD_TIMEOUT, |limit| limit.min(YIELD_TIMEOUT)))
    } else {
        timeout
    }
}

// ----------------------------------------------------------------------------

impl State {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Listening => "listening",
            State::Running => "running",
            State::Stopped => "stopped",
        }
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl fmt::Display for State {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------

impl<H> fmt::Debug for Engine<H>
where
    H: Handler,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("connections", &self.slots.len())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::io::{Read, Write};
    use std::net::TcpStream;

    /// Handler recording all events.
    #[derive(Default)]
    struct Recorder {
        log: Rc<RefCell<Vec<String>>>,
        suspend: bool,
        hold: Rc<Cell<bool>>,
    }

    impl Recorder {
        fn push(&self, entry: String) {
            self.log.borrow_mut().push(entry);
        }
    }

    impl Handler for Recorder {
        fn on_connect(&mut self, _: &Connection) -> Task {
            self.push("connect".into());
            if self.hold.get() {
                let hold = Rc::clone(&self.hold);
                return Task::new(async move {
                    while hold.get() {
                        yield_now().await;
                    }
                    Ok(())
                });
            }
            if !self.suspend {
                return Task::done();
            }
            let log = Rc::clone(&self.log);
            Task::new(async move {
                yield_now().await;
                yield_now().await;
                log.borrow_mut().push("connected".into());
                Ok(())
            })
        }

        fn on_data(&mut self, conn: &Connection, data: Vec<u8>) -> Task {
            let text = String::from_utf8_lossy(&data).into_owned();
            self.push(format!("data {text}"));
            match text.as_str() {
                "fail" => Task::ready(Err("boom".into())),
                "quit" => {
                    conn.disconnect();
                    Task::done()
                }
                _ => {
                    conn.write_raw(&data);
                    Task::done()
                }
            }
        }

        fn on_close(&mut self, _: &Connection) -> Task {
            self.push("close".into());
            Task::done()
        }

        fn on_error(&mut self, _: &Connection, err: BoxError) -> Task {
            self.push(format!("error {err}"));
            Task::ready(Err("ignored".into()))
        }
    }

    fn setup(handler: Recorder) -> (Engine<Recorder>, TcpStream) {
        let mut engine = Engine::new(handler, &Config::default()).unwrap();
        engine.listen("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(engine.local_addr().unwrap()).unwrap();
        (engine, client)
    }

    fn tick_until<F>(engine: &mut Engine<Recorder>, mut f: F)
    where
        F: FnMut(&Engine<Recorder>) -> bool,
    {
        for _ in 0..500 {
            if f(engine) {
                return;
            }
            engine.tick(Some(Duration::from_millis(10))).unwrap();
        }
        panic!("condition not met");
    }

    fn entries(engine: &Engine<Recorder>) -> Vec<String> {
        engine.handler().log.borrow().clone()
    }

    fn backlog(engine: &Engine<Recorder>) -> usize {
        engine.slots.iter().map(|(_, slot)| slot.pending.len()).sum()
    }

    fn received(engine: &Engine<Recorder>) -> String {
        entries(engine)
            .iter()
            .filter_map(|entry| entry.strip_prefix("data "))
            .collect()
    }

    #[test]
    fn test_lifecycle() {
        let (mut engine, mut client) = setup(Recorder::default());
        tick_until(&mut engine, |e| e.connections() == 1);

        // Data is echoed back
        client.write_all(b"hello").unwrap();
        let mut buf = [0; 5];
        let mut echoed = 0;
        tick_until(&mut engine, |_| {
            client.set_nonblocking(true).unwrap();
            if let Ok(n) = client.read(&mut buf[echoed..]) {
                echoed += n;
            }
            echoed == 5
        });
        assert_eq!(&buf, b"hello");

        // Closing the client closes the connection
        drop(client);
        tick_until(&mut engine, |e| e.connections() == 0);
        assert_eq!(entries(&engine), ["connect", "data hello", "close"]);
    }

    #[test]
    fn test_events_wait_for_suspended_task() {
        let handler = Recorder { suspend: true, ..Default::default() };
        let (mut engine, mut client) = setup(handler);
        client.write_all(b"early").unwrap();
        tick_until(&mut engine, |e| entries(e).len() == 3);
        assert_eq!(entries(&engine), ["connect", "connected", "data early"]);
    }

    #[test]
    fn test_task_error() {
        let (mut engine, mut client) = setup(Recorder::default());
        client.write_all(b"fail").unwrap();
        tick_until(&mut engine, |e| entries(e).len() == 3);
        assert_eq!(entries(&engine), ["connect", "data fail", "error boom"]);
        assert_eq!(engine.connections(), 1);
    }

    #[test]
    fn test_disconnect_by_handler() {
        let (mut engine, mut client) = setup(Recorder::default());
        tick_until(&mut engine, |e| e.connections() == 1);
        client.write_all(b"quit").unwrap();
        tick_until(&mut engine, |e| e.connections() == 0);
        assert_eq!(entries(&engine), ["connect", "data quit", "close"]);

        // Client sees end of stream
        client.set_nonblocking(false).unwrap();
        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_backlog_is_bounded() {
        let hold = Rc::new(Cell::new(true));
        let handler = Recorder { hold: Rc::clone(&hold), ..Default::default() };
        let (mut engine, mut client) = setup(handler);
        tick_until(&mut engine, |e| e.connections() == 1);

        // Reading pauses once the queue of the blocked connection is full
        let mut expected = String::new();
        for n in 1..=MAX_PENDING * 2 {
            let letter = b'a' + u8::try_from(n % 26).unwrap();
            client.write_all(&[letter]).unwrap();
            expected.push(char::from(letter));
            tick_until(&mut engine, |e| backlog(e) == n.min(MAX_PENDING));
        }
        for _ in 0..10 {
            engine.tick(Some(Duration::from_millis(5))).unwrap();
            assert_eq!(backlog(&engine), MAX_PENDING);
        }

        // Unread data is picked up once the connection catches up
        hold.set(false);
        tick_until(&mut engine, |e| received(e).len() == expected.len());
        assert_eq!(received(&engine), expected);
        assert_eq!(backlog(&engine), 0);
    }

    #[test]
    fn test_poll_timeout() {
        let limit = Some(Duration::from_secs(1));
        assert_eq!(poll_timeout(limit, false), limit);
        assert_eq!(poll_timeout(None, false), None);
        assert_eq!(poll_timeout(limit, true), Some(YIELD_TIMEOUT));
        assert_eq!(poll_timeout(None, true), Some(YIELD_TIMEOUT));
        assert_eq!(
            poll_timeout(Some(Duration::ZERO), true),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_stop() {
        let (mut engine, mut client) = setup(Recorder::default());
        tick_until(&mut engine, |e| e.connections() == 1);
        engine.controller().stop().unwrap();
        engine.tick(None).unwrap();
        assert_eq!(engine.state(), State::Stopped);
        assert_eq!(engine.connections(), 0);

        // Client receives close frame with going away
        client.set_nonblocking(false).unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert_eq!(&buf[..4], [0x88, 0x16, 0x03, 0xE9]);
    }

    #[test]
    fn test_invalid_state() {
        let mut engine = Engine::new(Recorder::default(), &Config::default())
            .unwrap();
        assert!(matches!(engine.run(), Err(Error::NotListening)));
        assert!(matches!(engine.local_addr(), Err(Error::NotListening)));
        engine.listen("127.0.0.1:0").unwrap();
        assert!(matches!(
            engine.listen("127.0.0.1:0"),
            Err(Error::InvalidState("listening"))
        ));
    }
}
