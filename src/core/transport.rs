//! TCP transport for chat sessions
//!
//! Thin wrappers over `std::net` providing the primitives a session needs:
//! bind + poll-accept, dial with timeout, line write and line read.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("No address found for {0}")]
    NoAddress(String),

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("Failed to read from peer: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write to peer: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to configure socket: {0}")]
    Configure(#[source] io::Error),

    #[error("Connection attempt cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether the accept loop may keep listening after this error.
    ///
    /// Only failures tied to a single aborted handshake qualify; anything
    /// else (descriptor exhaustion, permission, a dead listener) ends it.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Accept(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Bind a listening socket on all IPv4 interfaces.
///
/// The socket is non-blocking so the accept phase can poll and notice close.
pub fn bind_listener(port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .map_err(|source| TransportError::Bind { port, source })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| TransportError::Bind { port, source })?;
    Ok(listener)
}

/// Accept one pending connection, if any.
pub fn try_accept(listener: &TcpListener) -> Result<Option<(TcpStream, SocketAddr)>> {
    match listener.accept() {
        Ok((stream, addr)) => {
            // Some platforms hand out sockets inheriting the listener's mode
            stream.set_nonblocking(false).map_err(TransportError::Accept)?;
            Ok(Some((stream, addr)))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
        Err(e) => Err(TransportError::Accept(e)),
    }
}

/// Open a stream to `host:port`, trying every resolved address in turn.
///
/// `cancelled` is checked before each attempt so a closed session stops
/// dialing the remaining addresses. An attempt already in progress runs
/// until it succeeds, fails or hits `timeout`; name resolution has no
/// timeout of its own.
pub fn dial<F>(
    host: &str,
    port: u16,
    timeout: Duration,
    cancelled: F,
) -> Result<(TcpStream, SocketAddr)>
where
    F: Fn() -> bool,
{
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        if cancelled() {
            return Err(TransportError::Cancelled);
        }
        debug!("dialing {}", addr);
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok((stream, addr)),
            Err(source) => last_err = Some(TransportError::Connect { addr, source }),
        }
    }

    Err(last_err.unwrap_or_else(|| TransportError::NoAddress(format!("{}:{}", host, port))))
}

/// Apply per-connection socket options.
pub fn configure_stream(stream: &TcpStream, write_timeout: Option<Duration>) -> Result<()> {
    stream.set_nodelay(true).map_err(TransportError::Configure)?;
    stream
        .set_write_timeout(write_timeout)
        .map_err(TransportError::Configure)?;
    Ok(())
}

/// Write one chat line followed by the delimiter and flush.
pub fn write_line(mut stream: &TcpStream, text: &str) -> Result<()> {
    let mut buf = Vec::with_capacity(text.len() + 1);
    buf.extend_from_slice(text.as_bytes());
    buf.push(b'\n');
    stream.write_all(&buf).map_err(TransportError::Write)?;
    stream.flush().map_err(TransportError::Write)
}

/// Shut down both directions, unblocking any reader. Errors are ignored.
pub fn shutdown(stream: &TcpStream) {
    let _ = stream.shutdown(Shutdown::Both);
}

/// Reads newline-delimited text from a stream
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: io::Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::with_capacity(256),
        }
    }

    /// Read the next line. `Ok(None)` means end of stream.
    ///
    /// A final line without a delimiter is still returned before EOF.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let n = self
            .inner
            .read_until(b'\n', &mut self.buf)
            .map_err(TransportError::Read)?;
        if n == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_reader_delimiters() {
        let data: &[u8] = b"hello\nworld\r\n\nlast";
        let mut reader = LineReader::new(data);

        assert_eq!(reader.read_line().unwrap().as_deref(), Some("hello"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("world"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("last"));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_line_reader_invalid_utf8() {
        let data: &[u8] = b"caf\xff\n";
        let mut reader = LineReader::new(data);
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("caf\u{fffd}"));
    }

    #[test]
    fn test_bind_conflict() {
        let first = bind_listener(0).unwrap();
        let port = first.local_addr().unwrap().port();

        match bind_listener(port) {
            Err(TransportError::Bind { port: p, .. }) => assert_eq!(p, port),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_try_accept_without_peer() {
        let listener = bind_listener(0).unwrap();
        assert!(try_accept(&listener).unwrap().is_none());
    }

    #[test]
    fn test_dial_stops_when_cancelled() {
        let listener = bind_listener(0).unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = dial("127.0.0.1", port, Duration::from_secs(2), || true);
        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert!(try_accept(&listener).unwrap().is_none());
    }

    #[test]
    fn test_accept_error_classification() {
        let aborted = TransportError::Accept(io::Error::from(io::ErrorKind::ConnectionAborted));
        assert!(aborted.is_retryable());

        let interrupted = TransportError::Accept(io::Error::from(io::ErrorKind::Interrupted));
        assert!(interrupted.is_retryable());

        // e.g. EMFILE / ENFILE
        let exhausted = TransportError::Accept(io::Error::new(
            io::ErrorKind::Other,
            "too many open files",
        ));
        assert!(!exhausted.is_retryable());

        let denied = TransportError::Accept(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!denied.is_retryable());

        let read = TransportError::Read(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!read.is_retryable());
    }

    #[test]
    fn test_dial_and_write_line() {
        let listener = bind_listener(0).unwrap();
        let port = listener.local_addr().unwrap().port();

        let (client, addr) =
            dial("127.0.0.1", port, Duration::from_secs(2), || false).unwrap();
        assert_eq!(addr.port(), port);
        configure_stream(&client, Some(Duration::from_secs(2))).unwrap();

        let server = loop {
            if let Some((stream, _)) = try_accept(&listener).unwrap() {
                break stream;
            }
            std::thread::sleep(Duration::from_millis(5));
        };

        write_line(&client, "ping").unwrap();
        shutdown(&client);

        let mut reader = LineReader::new(server);
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("ping"));
        assert_eq!(reader.read_line().unwrap(), None);
    }
}
