//! Error types for the echo server.

use crate::config::ConfigError;
use crate::presentation::PresentationError;
use thiserror::Error;

/// Errors raised while serving.
///
/// Everything except `Io` on the listener is scoped to a single connection:
/// the accept loop logs it and moves on to the next peer.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Presentation error: {0}")]
    Presentation(#[from] PresentationError),

    /// Reassembled message grew past `max_message_size`
    #[error("Message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    /// Peer closed in the middle of a message
    #[error("Peer closed after {received} bytes of an incomplete message")]
    TruncatedMessage { received: usize },
}
