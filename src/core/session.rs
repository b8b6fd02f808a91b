//! Chat session management
//!
//! A [`ConnectionSession`] owns exactly one chat connection. A single
//! background worker thread performs the blocking accept or dial and then
//! runs the inbound line loop. Lines and state changes are reported through
//! an mpsc channel held by the session.
//!
//! State, the listener and the event sender sit behind one mutex. Every
//! transition and every emitted event happens while it is held, so no
//! `LineReceived` can follow the terminal `StateChanged` and two racing
//! closes cannot both tear the connection down.
//!
//! The write half has its own lock. A send blocked on a slow peer holds only
//! that lock, so `close()` can still shut the socket down through a separate
//! control handle, which fails the pending write.

use std::net::{SocketAddr, TcpListener, TcpStream};
#[cfg(test)]
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::state::{ConnectionState, StateCell};
use super::transport::{self, LineReader, TransportError};

/// Why a session changed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateReason {
    /// A peer connected to our listening port
    PeerAccepted(SocketAddr),
    /// Our dial reached the remote host
    Dialed(SocketAddr),
    /// close() was requested locally
    UserClosed,
    /// The peer closed the stream
    PeerClosed,
    /// Read or write failure while connected
    ConnectionLost(String),
    /// The outbound connection attempt failed
    DialFailed(String),
    /// The listener failed while waiting for a peer
    AcceptFailed(String),
}

/// Session notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session committed a new state
    StateChanged {
        state: ConnectionState,
        reason: StateReason,
    },
    /// A line arrived from the peer
    LineReceived(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Bind(TransportError),
}

/// Tunables for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound for a single dial attempt
    pub connect_timeout: Duration,
    /// Upper bound for a blocked send; `None` waits forever
    pub write_timeout: Option<Duration>,
    /// How often the accept phase checks for a peer
    pub accept_poll: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Some(Duration::from_secs(5)),
            accept_poll: Duration::from_millis(20),
        }
    }
}

/// How the session was started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    Listen { port: u16 },
    Dial { host: String, port: u16 },
}

struct Inner {
    /// Present while listening
    listener: Option<TcpListener>,
    /// Shutdown handle, present iff connected
    control: Option<TcpStream>,
    peer: Option<SocketAddr>,
    events: Sender<SessionEvent>,
}

struct Shared {
    state: StateCell,
    inner: Mutex<Inner>,
    /// Write half. Teardown only try_locks it, so a stalled send can't block close.
    writer: Mutex<Option<TcpStream>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self, inner: &mut Inner, state: ConnectionState, reason: StateReason) {
        self.state.store(state);
        // The owner may already be gone; nothing to report to then
        let _ = inner.events.send(SessionEvent::StateChanged { state, reason });
    }

    /// Move to CLOSED, releasing every socket. Returns false if already closed.
    fn teardown(&self, inner: &mut Inner, reason: StateReason) -> bool {
        if self.state.load().is_terminal() {
            return false;
        }

        inner.listener = None;
        if let Some(stream) = inner.control.take() {
            transport::shutdown(&stream);
        }
        // A blocked send keeps the writer; it drops it itself once the
        // shutdown above fails its write.
        match self.writer.try_lock() {
            Ok(mut writer) => *writer = None,
            Err(TryLockError::Poisoned(e)) => *e.into_inner() = None,
            Err(TryLockError::WouldBlock) => {}
        }
        self.commit(inner, ConnectionState::Closed, reason);
        true
    }

    fn close(&self) {
        let mut inner = self.lock();
        if self.teardown(&mut inner, StateReason::UserClosed) {
            info!("session closed by user");
        }
    }

    fn send(&self, text: &str) -> bool {
        if self.state.load() != ConnectionState::Connected {
            return false;
        }

        let result = {
            let mut writer = self.lock_writer();
            if self.state.load() != ConnectionState::Connected {
                *writer = None;
                return false;
            }
            match writer.as_ref() {
                Some(stream) => transport::write_line(stream, text),
                None => return false,
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                let mut inner = self.lock();
                // Fails silently if close() got here first
                if self.teardown(&mut inner, StateReason::ConnectionLost(e.to_string())) {
                    warn!("send failed: {}", e);
                }
                false
            }
        }
    }

    /// Commit CONNECTED for a fresh stream and hand back its reader.
    fn establish(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        reason: StateReason,
        options: &SessionOptions,
    ) -> Option<LineReader<TcpStream>> {
        let prepared = transport::configure_stream(&stream, options.write_timeout).and_then(|()| {
            let read_half = stream.try_clone().map_err(TransportError::Configure)?;
            let write_half = stream.try_clone().map_err(TransportError::Configure)?;
            Ok((read_half, write_half))
        });

        let mut inner = self.lock();
        if self.state.load().is_terminal() {
            debug!("discarding connection to {} after close", peer);
            transport::shutdown(&stream);
            return None;
        }

        match prepared {
            Ok((read_half, write_half)) => {
                inner.listener = None;
                inner.control = Some(stream);
                *self.lock_writer() = Some(write_half);
                inner.peer = Some(peer);
                self.commit(&mut inner, ConnectionState::Connected, reason);
                info!("connected to {}", peer);
                Some(LineReader::new(read_half))
            }
            Err(e) => {
                warn!("failed to set up connection to {}: {}", peer, e);
                transport::shutdown(&stream);
                self.teardown(&mut inner, StateReason::ConnectionLost(e.to_string()));
                None
            }
        }
    }
}

/// Accept phase of a listening session
fn accept_peer(shared: &Shared, options: &SessionOptions) -> Option<(TcpStream, SocketAddr)> {
    loop {
        {
            let mut inner = shared.lock();
            let result = transport::try_accept(inner.listener.as_ref()?);
            match result {
                Ok(Some(accepted)) => return Some(accepted),
                Ok(None) => {}
                Err(e) if e.is_retryable() => debug!("{}", e),
                Err(e) => {
                    warn!("giving up on listener: {}", e);
                    shared.teardown(&mut inner, StateReason::AcceptFailed(e.to_string()));
                    return None;
                }
            }
        }
        thread::sleep(options.accept_poll);
    }
}

/// Deliver inbound lines until the stream ends or the session is closed
fn read_loop(shared: &Shared, mut reader: LineReader<TcpStream>) {
    loop {
        let outcome = reader.read_line();

        let mut inner = shared.lock();
        if shared.state.load() != ConnectionState::Connected {
            debug!("reader stopping, session already closed");
            return;
        }

        match outcome {
            Ok(Some(line)) => {
                let _ = inner.events.send(SessionEvent::LineReceived(line));
            }
            Ok(None) => {
                info!("connection closed by peer");
                shared.teardown(&mut inner, StateReason::PeerClosed);
                return;
            }
            Err(e) => {
                warn!("connection lost: {}", e);
                shared.teardown(&mut inner, StateReason::ConnectionLost(e.to_string()));
                return;
            }
        }
    }
}

fn run_listener(shared: Arc<Shared>, options: SessionOptions) {
    let Some((stream, peer)) = accept_peer(&shared, &options) else {
        debug!("accept phase ended");
        return;
    };

    if let Some(reader) = shared.establish(stream, peer, StateReason::PeerAccepted(peer), &options) {
        read_loop(&shared, reader);
    }
}

fn run_dialer(shared: Arc<Shared>, host: String, port: u16, options: SessionOptions) {
    let cancelled = || shared.state.load().is_terminal();
    match transport::dial(&host, port, options.connect_timeout, cancelled) {
        Ok((stream, peer)) => {
            if let Some(reader) = shared.establish(stream, peer, StateReason::Dialed(peer), &options) {
                read_loop(&shared, reader);
            }
        }
        Err(e) => {
            let mut inner = shared.lock();
            if shared.teardown(&mut inner, StateReason::DialFailed(e.to_string())) {
                warn!("could not connect to {}:{}: {}", host, port, e);
            }
        }
    }
}

/// Cloneable handle for watching and closing a session from another thread
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    pub fn close(&self) {
        self.shared.close()
    }
}

/// A single chat connection
pub struct ConnectionSession {
    direction: Direction,
    shared: Arc<Shared>,
    events: Receiver<SessionEvent>,
    local_addr: Option<SocketAddr>,
    worker: Option<JoinHandle<()>>,
}

impl ConnectionSession {
    /// Start listening on `port` and wait for one peer in the background.
    ///
    /// Fails immediately if the port cannot be bound.
    pub fn listen(port: u16, options: &SessionOptions) -> Result<Self, SessionError> {
        let listener = transport::bind_listener(port).map_err(SessionError::Bind)?;
        let local_addr = listener.local_addr().ok();
        info!("listening on {:?}", local_addr);

        let (shared, events) = Self::shared(ConnectionState::Listening, Some(listener));
        let worker = {
            let shared = shared.clone();
            let options = options.clone();
            thread::spawn(move || run_listener(shared, options))
        };

        Ok(Self {
            direction: Direction::Listen { port },
            shared,
            events,
            local_addr,
            worker: Some(worker),
        })
    }

    /// Dial `host:port` in the background.
    ///
    /// The outcome arrives as a `StateChanged` event. Closing while dialing
    /// reports CLOSED at once, but an attempt already in flight keeps the
    /// worker busy until it ends or `connect_timeout` expires; name
    /// resolution is not bounded at all.
    pub fn connect(host: &str, port: u16, options: &SessionOptions) -> Self {
        info!("connecting to {}:{}", host, port);

        let (shared, events) = Self::shared(ConnectionState::Connecting, None);
        let worker = {
            let shared = shared.clone();
            let host = host.to_string();
            let options = options.clone();
            thread::spawn(move || run_dialer(shared, host, port, options))
        };

        Self {
            direction: Direction::Dial {
                host: host.to_string(),
                port,
            },
            shared,
            events,
            local_addr: None,
            worker: Some(worker),
        }
    }

    fn shared(
        state: ConnectionState,
        listener: Option<TcpListener>,
    ) -> (Arc<Shared>, Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            state: StateCell::new(state),
            inner: Mutex::new(Inner {
                listener,
                control: None,
                peer: None,
                events: tx,
            }),
            writer: Mutex::new(None),
        });
        (shared, rx)
    }

    /// Current state; never blocks
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    pub fn direction(&self) -> &Direction {
        &self.direction
    }

    /// Bound address of a listening session
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Address of the peer once connected
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().peer
    }

    /// Send one line to the peer.
    ///
    /// Returns false without doing anything unless connected. A slow peer
    /// can stall this call up to the configured write timeout, or until the
    /// session is closed from another thread.
    pub fn send(&self, text: &str) -> bool {
        self.shared.send(text)
    }

    /// Close the session. Idempotent.
    pub fn close(&self) {
        self.shared.close()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    /// Next pending event, if any
    pub fn try_event(&self) -> Option<SessionEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event
    #[cfg(test)]
    pub fn next_event(&self, timeout: Duration) -> Option<SessionEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// All events currently queued
    pub fn drain_events(&self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_event() {
            events.push(event);
        }
        events
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();

        // A worker still inside a dial or an accept poll exits on its own
        // once it sees the session closed; don't stall the owner on it.
        if let Some(handle) = self.worker.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                debug!("detaching session worker");
            }
        }
    }
}
