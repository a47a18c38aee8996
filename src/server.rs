//! TCP server: binds, accepts one peer at a time, and hands each to the
//! connection loop.
//!
//! The accept wait goes through a mio `Poll` so that a `ShutdownHandle`
//! can wake it. Once a peer is accepted, all socket I/O on it is blocking
//! and the next `accept` is not issued until that peer is closed.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::ServerError;
use crate::presentation::Presenter;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::dispatcher::{self, Dispatch};
use tracing::{debug, error, info, info_span, warn};

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

/// Pending connections the kernel queues while a peer is being served.
const BACKLOG: i32 = 1;

/// Server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No socket bound yet.
    Idle,
    /// Bound and waiting for a peer.
    Listening,
    /// Serving one peer.
    Connected,
    /// Accept loop has exited; the listener is closed.
    Stopped,
}

/// Stops a running server from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    stopping: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Ask the accept loop to exit. A peer being served is finished first.
    pub fn shutdown(&self) -> io::Result<()> {
        self.stopping.store(true, Ordering::Release);
        self.waker.wake()
    }
}

/// Server instance
pub struct Server {
    config: ServerConfig,
    presenter: Box<dyn Presenter>,
    dispatch: Dispatch,
    poll: Poll,
    waker: Arc<Waker>,
    stopping: Arc<AtomicBool>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    state: ServerState,
}

impl Server {
    /// Create a new server instance. Nothing is bound until `bind` or `start`.
    ///
    /// Log events go to the dispatcher that is current at construction time;
    /// use `with_dispatch` to route them elsewhere.
    pub fn new(config: ServerConfig, presenter: Box<dyn Presenter>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Server {
            config,
            presenter,
            dispatch: dispatcher::get_default(Dispatch::clone),
            poll,
            waker,
            stopping: Arc::new(AtomicBool::new(false)),
            listener: None,
            local_addr: None,
            state: ServerState::Idle,
        })
    }

    /// Send this server's log events to `dispatch`.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            waker: Arc::clone(&self.waker),
            stopping: Arc::clone(&self.stopping),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Address the listener is bound to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listening socket. Calling it again is a no-op.
    pub fn bind(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(addr) = self.local_addr {
            return Ok(addr);
        }

        let addr = self.config.socket_addr()?;
        let listener = create_listener(addr)?;
        let local_addr = listener.local_addr()?;

        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        self.state = ServerState::Listening;
        Ok(local_addr)
    }

    /// Bind if needed, then accept and serve peers one at a time until
    /// shut down.
    pub fn start(&mut self) -> Result<(), ServerError> {
        let dispatch = self.dispatch.clone();
        dispatcher::with_default(&dispatch, || self.run())
    }

    fn run(&mut self) -> Result<(), ServerError> {
        let addr = self.bind()?;
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed").into())
            }
        };

        let span = info_span!("server", %addr);
        let _enter = span.enter();

        let fd = listener.as_raw_fd();
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), LISTENER_TOKEN, Interest::READABLE)?;

        info!("Server start");

        let mut events = Events::with_capacity(8);
        let result = self.accept_loop(&listener, &mut events);

        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            debug!(error = %e, "Failed to deregister listener");
        }
        drop(listener);
        self.state = ServerState::Stopped;
        info!("Server down");

        result
    }

    fn accept_loop(
        &mut self,
        listener: &TcpListener,
        events: &mut Events,
    ) -> Result<(), ServerError> {
        while !self.stopping.load(Ordering::Acquire) {
            match self.poll.poll(events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let readable = events.iter().any(|event| event.token() == LISTENER_TOKEN);
            if readable {
                self.accept_pending(listener)?;
            }
        }
        Ok(())
    }

    /// Drain the listener's queue, serving each peer to completion.
    ///
    /// Readiness is edge-triggered, so the queue must be emptied before the
    /// next poll. Errors tied to one pending peer skip that peer; anything
    /// else (descriptor exhaustion, a broken listener) ends the accept loop.
    fn accept_pending(&mut self, listener: &TcpListener) -> Result<(), ServerError> {
        while !self.stopping.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, peer)) => self.handle_client(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_per_connection_error(&e) => {
                    warn!(error = %e, "Pending connection dropped before accept");
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn handle_client(&mut self, stream: TcpStream, peer: SocketAddr) {
        let span = info_span!("connection", %peer);
        let _enter = span.enter();

        self.state = ServerState::Connected;
        info!("Client connected");

        let result = Connection::new(stream, peer, self.config.buffer_size)
            .map_err(ServerError::from)
            .and_then(|mut conn| conn.serve(self.presenter.as_ref(), &self.config));

        if let Err(e) = result {
            warn!(error = %e, "Connection aborted");
        }

        info!("Drop connection");
        self.state = ServerState::Listening;
    }
}

/// Accept failures that concern only the peer being accepted.
fn is_per_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    ) || e.raw_os_error() == Some(libc::EPROTO)
}

/// Non-blocking listener with the single-slot backlog.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
