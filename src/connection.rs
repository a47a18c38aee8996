//! A single accepted peer and its request/reply loop.
//!
//! The loop is strictly synchronous: read one message, reply, repeat.
//! A message may span several reads of `buffer_size` bytes; bytes are
//! accumulated until the presenter can decode them as a whole.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presentation::Presenter;
use bytes::BytesMut;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use tracing::{debug, info, trace};

/// Reply sent when the stop word arrives.
pub const FAREWELL: &str = "Bye, bye!";

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for (the rest of) a message.
    Receiving,
    /// Writing a reply.
    Replying,
    /// Socket has been shut down.
    Closed,
}

/// Outcome of one receive step.
#[derive(Debug, PartialEq, Eq)]
enum Received {
    Message(String),
    /// Zero-length read with nothing buffered.
    Disconnected,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    state: ConnState,
    /// Scratch space for one receive call
    chunk: Vec<u8>,
    /// Bytes of the message being reassembled
    pending: BytesMut,
}

impl Connection {
    /// Wrap an accepted stream. The stream is switched to blocking mode.
    pub fn new(stream: TcpStream, peer: SocketAddr, buffer_size: usize) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        Ok(Self {
            stream,
            peer,
            state: ConnState::Receiving,
            chunk: vec![0; buffer_size],
            pending: BytesMut::with_capacity(buffer_size),
        })
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Run the echo loop until the stop word, a disconnect, or an error.
    ///
    /// The socket is shut down on every exit path that returns `Ok`; on
    /// error the caller drops the connection.
    pub fn serve(
        &mut self,
        presenter: &dyn Presenter,
        config: &ServerConfig,
    ) -> Result<(), ServerError> {
        loop {
            let text = match self.receive(presenter, config.max_message_size)? {
                Received::Message(text) => text,
                Received::Disconnected => {
                    debug!(peer = %self.peer, "Peer closed the connection");
                    break;
                }
            };

            info!(message = %text, "Received");

            if text == config.stop_word {
                self.send(presenter, FAREWELL)?;
                break;
            }

            self.send(presenter, &text)?;
        }

        self.close();
        Ok(())
    }

    fn receive(
        &mut self,
        presenter: &dyn Presenter,
        max_message_size: usize,
    ) -> Result<Received, ServerError> {
        self.state = ConnState::Receiving;
        self.pending.clear();

        loop {
            let n = match self.stream.read(&mut self.chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            if n == 0 {
                if self.pending.is_empty() {
                    return Ok(Received::Disconnected);
                }
                return Err(ServerError::TruncatedMessage {
                    received: self.pending.len(),
                });
            }

            if self.pending.len() + n > max_message_size {
                return Err(ServerError::MessageTooLarge {
                    limit: max_message_size,
                });
            }
            self.pending.extend_from_slice(&self.chunk[..n]);

            match presenter.represent(&self.pending) {
                Ok(text) => return Ok(Received::Message(text)),
                Err(e) if e.is_incomplete() => {
                    trace!(buffered = self.pending.len(), "Partial message, reading more");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn send(&mut self, presenter: &dyn Presenter, text: &str) -> Result<(), ServerError> {
        self.state = ConnState::Replying;
        let bytes = presenter.prepare(text)?;
        self.stream.write_all(&bytes)?;
        trace!(bytes = bytes.len(), "Reply sent");
        Ok(())
    }

    fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closed;
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            // Peer may already be gone
            trace!(error = %e, "Shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::{GzipPresenter, PlainPresenter, TextEncoding};
    use std::net::TcpListener;
    use std::thread;

    /// Connected (server side, client side) pair over loopback.
    fn socket_pair(buffer_size: usize) -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        (Connection::new(stream, peer, buffer_size).unwrap(), client)
    }

    fn config(buffer_size: usize, max_message_size: usize) -> ServerConfig {
        ServerConfig {
            buffer_size,
            max_message_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_receive_reassembles_across_reads() {
        let presenter = GzipPresenter::new(TextEncoding::Utf8, 1);
        let (mut conn, mut client) = socket_pair(8);
        let payload = presenter.prepare("hello world, hello world").unwrap();
        assert!(payload.len() > 8);
        client.write_all(&payload).unwrap();

        let received = conn.receive(&presenter, 1024).unwrap();
        assert_eq!(
            received,
            Received::Message("hello world, hello world".to_string())
        );
        assert_eq!(conn.state(), ConnState::Receiving);
    }

    #[test]
    fn test_receive_disconnect_and_truncation() {
        let presenter = GzipPresenter::new(TextEncoding::Utf8, 1);

        let (mut conn, client) = socket_pair(64);
        drop(client);
        assert_eq!(conn.receive(&presenter, 1024).unwrap(), Received::Disconnected);

        let (mut conn, mut client) = socket_pair(64);
        let payload = presenter.prepare("cut short").unwrap();
        client.write_all(&payload[..payload.len() - 4]).unwrap();
        drop(client);
        assert!(matches!(
            conn.receive(&presenter, 1024),
            Err(ServerError::TruncatedMessage { .. })
        ));
    }

    #[test]
    fn test_receive_limit() {
        let presenter = GzipPresenter::new(TextEncoding::Utf8, 1);
        let (mut conn, mut client) = socket_pair(4);
        let payload = presenter.prepare("this will not fit").unwrap();
        client.write_all(&payload).unwrap();
        assert!(matches!(
            conn.receive(&presenter, 8),
            Err(ServerError::MessageTooLarge { limit: 8 })
        ));
    }

    #[test]
    fn test_serve_plain_echo_then_stop() {
        let presenter = PlainPresenter::default();
        let (mut conn, mut client) = socket_pair(64);

        let handle = thread::spawn(move || {
            conn.serve(&PlainPresenter::default(), &config(64, 1024))
                .unwrap();
            conn.state()
        });

        let mut buf = [0u8; 64];
        client.write_all(&presenter.prepare("ping").unwrap()).unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(presenter.represent(&buf[..n]).unwrap(), "ping");

        client.write_all(&presenter.prepare("STOP").unwrap()).unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(presenter.represent(&buf[..n]).unwrap(), FAREWELL);
        assert_eq!(client.read(&mut buf).unwrap(), 0);

        assert_eq!(handle.join().unwrap(), ConnState::Closed);
    }
}
