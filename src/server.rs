//! TCP server for the static HTTP backend.
//!
//! Accepts connections forever and hands each one to its own task. A task
//! reads the request once, answers with the fixed page from
//! [`crate::response`], and closes the socket.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, trace, warn};

use crate::response;

/// Pending connection queue depth passed to `listen(2)`.
pub const LISTEN_BACKLOG: i32 = 5;

/// Upper bound for the single request read.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Number of request characters included in the log preview.
pub const PREVIEW_CHARS: usize = 200;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How long accept must keep failing, with no success in between, before
/// the listener gives up.
const PERSISTENT_ACCEPT_FAILURE: Duration = Duration::from_secs(30);

/// Server instance
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the listening socket. Must be called from within a tokio runtime.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::from_std(bind_listener(addr)?)?;
        let local_addr = listener.local_addr()?;
        Ok(Server {
            listener,
            local_addr,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the process exits.
    ///
    /// Accept failures are logged and retried after [`ACCEPT_RETRY_DELAY`].
    /// Only failures that last [`PERSISTENT_ACCEPT_FAILURE`] without a
    /// successful accept in between end the loop with the last error.
    pub async fn run(self) -> io::Result<()> {
        info!(address = %self.local_addr, "Server listening");

        let mut failures = AcceptFailures::default();

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    failures.reset();
                    info!(peer = %peer, "New connection");

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer).await {
                            warn!(peer = %peer, error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    let persistent = failures.record(Instant::now());
                    error!(error = %e, count = failures.count, "Failed to accept connection");
                    if persistent {
                        return Err(e);
                    }
                    // EMFILE and friends clear up once workers release their sockets
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Tracks an unbroken run of accept failures.
#[derive(Debug, Default)]
struct AcceptFailures {
    first: Option<Instant>,
    count: usize,
}

impl AcceptFailures {
    /// Record a failure at `now`. Returns `true` once failures have
    /// continued for [`PERSISTENT_ACCEPT_FAILURE`].
    fn record(&mut self, now: Instant) -> bool {
        self.count += 1;
        let first = *self.first.get_or_insert(now);
        now.duration_since(first) >= PERSISTENT_ACCEPT_FAILURE
    }

    fn reset(&mut self) {
        self.first = None;
        self.count = 0;
    }
}

/// Create a TCP listener with SO_REUSEADDR so a restart does not hit
/// `EADDRINUSE` while old connections sit in TIME_WAIT.
fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Lifecycle of a single client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Idle,
    Reading,
    Writing,
    Closed,
}

/// A client connection owned by exactly one task.
///
/// The socket is closed when this value is dropped, which happens once on
/// every exit path of [`handle_connection`].
struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    state: ConnState,
}

impl<S> Connection<S> {
    fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            state: ConnState::Idle,
        }
    }

    fn transition(&mut self, state: ConnState) {
        trace!(peer = %self.peer, from = ?self.state, to = ?state, "Connection state");
        self.state = state;
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// One read of at most [`READ_BUFFER_SIZE`] bytes.
    async fn read_request(&mut self) -> io::Result<Vec<u8>> {
        self.transition(ConnState::Reading);
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let n = self.stream.read(&mut buffer).await?;
        buffer.truncate(n);
        Ok(buffer)
    }

    async fn write_response(&mut self, response: &[u8]) -> io::Result<()> {
        self.transition(ConnState::Writing);
        self.stream.write_all(response).await?;
        self.stream.shutdown().await
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        self.transition(ConnState::Closed);
    }
}

/// Handle a single client connection.
///
/// No HTTP parsing happens: the request is only decoded for the log
/// preview. A request that is not valid UTF-8 gets no response.
async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(stream, peer);

    let raw = conn.read_request().await?;
    let request = std::str::from_utf8(&raw)?;
    info!(
        peer = %peer,
        bytes = raw.len(),
        preview = %preview(request),
        "Received request"
    );

    conn.write_response(&response::build()).await?;
    Ok(())
}

/// First [`PREVIEW_CHARS`] characters of the request.
fn preview(request: &str) -> &str {
    match request.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => &request[..end],
        None => request,
    }
}
