//! Application controller
//!
//! Sits between the console and the connection core: turns commands into
//! session operations and session events into transcript lines. Holds at
//! most one live session at a time.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::session::{Direction, SessionHandle};
use crate::core::{ConnectionSession, ConnectionState, SessionEvent, SessionOptions, StateReason};
use crate::transcript::{Transcript, TranscriptLine};
use crate::ui::{commands, Command, Console};

/// How long the main loop waits for input before checking the session
const TICK: Duration = Duration::from_millis(20);

/// Handle to whichever session the app currently owns, shared with the
/// input thread so it can close the session when stdin goes away.
pub type ActiveSession = Arc<Mutex<Option<SessionHandle>>>;

/// Whether the main loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct App<W: Write> {
    config: Config,
    options: SessionOptions,
    session: Option<ConnectionSession>,
    active: ActiveSession,
    transcript: Transcript,
    console: Console<W>,
}

impl<W: Write> App<W> {
    pub fn new(config: Config, console: Console<W>) -> Self {
        let options = config.session_options();
        Self {
            config,
            options,
            session: None,
            active: ActiveSession::default(),
            transcript: Transcript::new(),
            console,
        }
    }

    /// State of the current session, if there is one
    pub fn state(&self) -> Option<ConnectionState> {
        self.session.as_ref().map(|s| s.state())
    }

    pub fn session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Shared slot tracking the current session
    pub fn active_session(&self) -> ActiveSession {
        self.active.clone()
    }

    fn install(&mut self, session: ConnectionSession) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.handle());
        self.session = Some(session);
    }

    /// A session that has not reached CLOSED yet
    fn is_active(&self) -> bool {
        matches!(self.state(), Some(state) if !state.is_terminal())
    }

    fn show(&mut self, line: TranscriptLine) -> io::Result<()> {
        self.console.line(&line)
    }

    fn system(&mut self, text: impl Into<String>) -> io::Result<()> {
        let line = self.transcript.push_system(text).clone();
        self.show(line)
    }

    /// Handle one line typed by the user
    pub fn handle_input(&mut self, input: &str) -> io::Result<Flow> {
        match commands::parse(input) {
            Ok(command) => self.handle_command(command),
            Err(e) => {
                self.console.error(&e.to_string())?;
                Ok(Flow::Continue)
            }
        }
    }

    pub fn handle_command(&mut self, command: Command) -> io::Result<Flow> {
        debug!("command: {:?}", command);
        match command {
            Command::Nothing => {}
            Command::Message(text) => self.send(&text)?,
            Command::Listen { port } => self.listen(port)?,
            Command::Connect { host, port } => self.connect(host, port)?,
            Command::Disconnect => self.disconnect()?,
            Command::Clear => {
                self.transcript.clear();
                self.console.info("Transcript cleared.")?;
            }
            Command::Save { path } => self.save(path)?,
            Command::Status => self.status()?,
            Command::Help => self.console.help()?,
            Command::Quit => {
                self.shutdown()?;
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    fn listen(&mut self, port: Option<u16>) -> io::Result<()> {
        if self.is_active() {
            return self.console.error("A connection is already open; /disconnect first.");
        }

        let port = port.unwrap_or(self.config.network.default_port);
        match ConnectionSession::listen(port, &self.options) {
            Ok(session) => {
                let bound = session.local_addr().map(|a| a.port()).unwrap_or(port);
                self.install(session);
                self.system(format!("Listening on port {}", bound))
            }
            Err(e) => {
                warn!("listen failed: {}", e);
                self.console.error(&e.to_string())
            }
        }
    }

    fn connect(&mut self, host: Option<String>, port: Option<u16>) -> io::Result<()> {
        if self.is_active() {
            return self.console.error("A connection is already open; /disconnect first.");
        }

        let host = host.unwrap_or_else(|| self.config.network.default_host.clone());
        let port = port.unwrap_or(self.config.network.default_port);
        self.install(ConnectionSession::connect(&host, port, &self.options));
        self.system(format!("Connecting to {}:{}...", host, port))
    }

    fn send(&mut self, text: &str) -> io::Result<()> {
        let sent = match &self.session {
            Some(session) if session.state() == ConnectionState::Connected => session.send(text),
            _ => return self.console.error("Not connected."),
        };

        if sent {
            let line = self.transcript.push_local(text).clone();
            self.show(line)?;
        }
        // A failed send closes the session; the event explains why
        self.pump_events().map(|_| ())
    }

    fn disconnect(&mut self) -> io::Result<()> {
        match &self.session {
            Some(session) if !session.state().is_terminal() => session.close(),
            _ => return self.console.error("Not connected."),
        }
        self.pump_events().map(|_| ())
    }

    fn save(&mut self, path: Option<PathBuf>) -> io::Result<()> {
        let path = path.unwrap_or_else(|| self.config.transcript_path());
        match self.transcript.save(&path) {
            Ok(()) => {
                info!("transcript saved to {}", path.display());
                self.console.info(&format!("Transcript saved to {}", path.display()))
            }
            Err(e) => self.console.error(&e.to_string()),
        }
    }

    fn status(&mut self) -> io::Result<()> {
        let detail = match &self.session {
            None => "Use /listen or /connect to start.".to_string(),
            Some(session) => {
                let target = match session.direction() {
                    Direction::Listen { port } => match session.local_addr() {
                        Some(addr) => format!("listening on port {}", addr.port()),
                        None => format!("listening on port {}", port),
                    },
                    Direction::Dial { host, port } => format!("dialing {}:{}", host, port),
                };
                match session.remote_addr() {
                    Some(peer) => format!("{}, peer {}", target, peer),
                    None => target,
                }
            }
        };
        let state = self.state();
        self.console.status(state, &detail)
    }

    /// Turn pending session events into transcript lines.
    ///
    /// Returns the number of events handled.
    pub fn pump_events(&mut self) -> io::Result<usize> {
        let events = match &self.session {
            Some(session) => session.drain_events(),
            None => return Ok(0),
        };

        let count = events.len();
        for event in events {
            self.handle_event(event)?;
        }
        Ok(count)
    }

    fn handle_event(&mut self, event: SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::LineReceived(text) => {
                let line = self.transcript.push_remote(text).clone();
                self.show(line)
            }
            SessionEvent::StateChanged { reason, .. } => {
                let notice = match reason {
                    StateReason::PeerAccepted(addr) | StateReason::Dialed(addr) => {
                        format!("Connected to {}", addr)
                    }
                    StateReason::UserClosed => "Disconnected.".to_string(),
                    StateReason::PeerClosed => "Connection closed by peer.".to_string(),
                    StateReason::ConnectionLost(e) => format!("Connection lost: {}", e),
                    StateReason::DialFailed(e) => format!("Could not connect: {}", e),
                    StateReason::AcceptFailed(e) => format!("Stopped listening: {}", e),
                };
                self.system(notice)
            }
        }
    }

    /// Close any live session and report its final events
    pub fn shutdown(&mut self) -> io::Result<()> {
        if let Some(session) = &self.session {
            session.close();
        }
        self.pump_events()?;
        Ok(())
    }

    /// Main loop: interleave user input with session events until quit.
    pub fn run(&mut self, input: Receiver<String>) -> anyhow::Result<()> {
        loop {
            self.pump_events()?;

            match input.recv_timeout(TICK) {
                Ok(line) => {
                    if self.handle_input(&line)? == Flow::Quit {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("input closed");
                    self.shutdown()?;
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Read stdin lines on a background thread.
///
/// When stdin ends, the live session is closed from this thread, so a main
/// loop stuck in a send to a stalled peer still gets to shut down.
pub fn spawn_input_reader(active: ActiveSession) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        forward_input(stdin.lock(), &tx, &active);
    });
    rx
}

fn forward_input<R: BufRead>(reader: R, tx: &Sender<String>, active: &ActiveSession) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        }
    }

    let slot = active.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(handle) = slot.as_ref() {
        if !handle.state().is_terminal() {
            info!("input closed, closing session");
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Origin;
    use std::time::Instant;

    fn app() -> App<Vec<u8>> {
        let mut config = Config::default();
        config.network.connect_timeout_ms = 2_000;
        config.network.accept_poll_ms = 5;
        App::new(config, Console::new(Vec::new(), false))
    }

    fn output(app: &App<Vec<u8>>) -> String {
        String::from_utf8_lossy(app.console.out_ref()).into_owned()
    }

    /// Pump both apps until `done` holds or five seconds pass.
    fn pump_until<F>(a: &mut App<Vec<u8>>, b: &mut App<Vec<u8>>, mut done: F)
    where
        F: FnMut(&App<Vec<u8>>, &App<Vec<u8>>) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            a.pump_events().unwrap();
            b.pump_events().unwrap();
            if done(a, b) {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!(
            "condition not reached\nA: {:?}\nB: {:?}",
            a.transcript().lines(),
            b.transcript().lines()
        );
    }

    fn has_line(app: &App<Vec<u8>>, origin: Origin, text: &str) -> bool {
        app.transcript()
            .lines()
            .iter()
            .any(|l| l.origin == origin && l.text == text)
    }

    fn connected_apps() -> (App<Vec<u8>>, App<Vec<u8>>) {
        let mut a = app();
        let mut b = app();

        a.handle_input("/listen 0").unwrap();
        let port = a.session().unwrap().local_addr().unwrap().port();
        b.handle_input(&format!("/connect 127.0.0.1:{}", port)).unwrap();

        pump_until(&mut a, &mut b, |a, b| {
            a.state() == Some(ConnectionState::Connected)
                && b.state() == Some(ConnectionState::Connected)
        });
        (a, b)
    }

    #[test]
    fn test_chat_between_apps() {
        let (mut a, mut b) = connected_apps();

        a.handle_input("ping").unwrap();
        pump_until(&mut a, &mut b, |_, b| has_line(b, Origin::Remote, "ping"));
        assert!(has_line(&a, Origin::Local, "ping"));

        b.handle_input("pong").unwrap();
        pump_until(&mut a, &mut b, |a, _| has_line(a, Origin::Remote, "pong"));

        a.handle_input("/disconnect").unwrap();
        assert!(has_line(&a, Origin::System, "Disconnected."));
        pump_until(&mut a, &mut b, |_, b| {
            has_line(b, Origin::System, "Connection closed by peer.")
        });
        assert_eq!(b.state(), Some(ConnectionState::Closed));
    }

    #[test]
    fn test_message_without_connection() {
        let mut a = app();
        assert_eq!(a.handle_input("hello").unwrap(), Flow::Continue);
        assert!(a.transcript().is_empty());
        assert!(output(&a).contains("error: Not connected."));
    }

    #[test]
    fn test_second_session_refused_while_active() {
        let mut a = app();
        a.handle_input("/listen 0").unwrap();
        a.handle_input("/connect localhost 1").unwrap();

        assert_eq!(a.state(), Some(ConnectionState::Listening));
        assert!(output(&a).contains("already open"));

        // Allowed again once closed
        a.handle_input("/disconnect").unwrap();
        a.handle_input("/listen 0").unwrap();
        assert_eq!(a.state(), Some(ConnectionState::Listening));
    }

    #[test]
    fn test_listen_on_taken_port() {
        let mut a = app();
        let mut b = app();
        a.handle_input("/listen 0").unwrap();
        let port = a.session().unwrap().local_addr().unwrap().port();

        b.handle_input(&format!("/listen {}", port)).unwrap();
        assert!(b.session().is_none());
        assert!(output(&b).contains("error: Failed to listen on port"));
    }

    #[test]
    fn test_invalid_port_reported() {
        let mut a = app();
        a.handle_input("/listen 70000").unwrap();
        assert!(a.session().is_none());
        assert!(output(&a).contains("70000 is not a valid port number."));
    }

    #[test]
    fn test_dial_failure_reported() {
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let mut a = app();
        let mut idle = app();
        a.handle_input(&format!("/connect 127.0.0.1 {}", port)).unwrap();

        pump_until(&mut a, &mut idle, |a, _| {
            a.transcript()
                .lines()
                .iter()
                .any(|l| l.text.starts_with("Could not connect:"))
        });
        assert_eq!(a.state(), Some(ConnectionState::Closed));
    }

    #[test]
    fn test_clear_and_save() {
        let (mut a, _b) = connected_apps();
        a.handle_input("one").unwrap();

        let path = std::env::temp_dir().join(format!("twochat-app-{}.txt", std::process::id()));
        a.handle_input(&format!("/save {}", path.display())).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(saved.contains("SENT: one\n"));

        a.handle_input("/clear").unwrap();
        assert!(a.transcript().is_empty());
    }

    #[test]
    fn test_quit_closes_session() {
        let (mut a, mut b) = connected_apps();
        assert_eq!(a.handle_input("/quit").unwrap(), Flow::Quit);
        assert_eq!(a.state(), Some(ConnectionState::Closed));
        pump_until(&mut a, &mut b, |_, b| b.state() == Some(ConnectionState::Closed));
    }

    #[test]
    fn test_input_eof_closes_active_session() {
        let mut a = app();
        let active = a.active_session();
        a.handle_input("/listen 0").unwrap();

        let (tx, rx) = mpsc::channel();
        forward_input(io::Cursor::new("hello\n/status\n"), &tx, &active);

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["hello", "/status"]);
        assert_eq!(a.state(), Some(ConnectionState::Closed));

        a.pump_events().unwrap();
        assert!(has_line(&a, Origin::System, "Disconnected."));
    }

    #[test]
    fn test_input_eof_without_session() {
        let active = ActiveSession::default();
        let (tx, rx) = mpsc::channel();
        forward_input(io::Cursor::new("/quit\n"), &tx, &active);
        assert_eq!(rx.try_recv().unwrap(), "/quit");
    }

    #[test]
    fn test_active_session_follows_latest() {
        let mut a = app();
        let active = a.active_session();
        assert!(active.lock().unwrap().is_none());

        a.handle_input("/listen 0").unwrap();
        a.handle_input("/disconnect").unwrap();
        a.handle_input("/listen 0").unwrap();

        let slot = active.lock().unwrap();
        assert_eq!(
            slot.as_ref().map(|h| h.state()),
            Some(ConnectionState::Listening)
        );
    }

    #[test]
    fn test_run_until_input_closes() {
        let mut a = app();
        let (tx, rx) = mpsc::channel();
        tx.send("/listen 0".to_string()).unwrap();
        tx.send("/status".to_string()).unwrap();
        drop(tx);

        a.run(rx).unwrap();
        assert_eq!(a.state(), Some(ConnectionState::Closed));
        assert!(output(&a).contains("[LISTENING] listening on port"));
    }
}
