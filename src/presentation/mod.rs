//! Presentation layer.
//!
//! Converts between application text and the bytes that travel over the
//! socket. A presenter holds only configuration; every call is independent.
//!
//! ## Presenters
//! - `gzip`: encode the text, then gzip-compress it (default)
//! - `plain`: encode the text, no compression
//!
//! Any presenter must satisfy the round-trip law:
//! `represent(&prepare(t)?)? == t` for every `t` the encoding can represent.

pub mod encoding;
pub mod gzip;
pub mod plain;

pub use encoding::TextEncoding;
pub use gzip::GzipPresenter;
pub use plain::PlainPresenter;

use crate::config::{CodecType, PresentationConfig};
use thiserror::Error;

/// Two-way transform between text and wire bytes.
pub trait Presenter: Send + Sync {
    /// Turn outgoing text into the bytes to transmit.
    fn prepare(&self, text: &str) -> Result<Vec<u8>, PresentationError>;

    /// Turn received bytes back into text.
    ///
    /// Returns `PresentationError::Incomplete` when `bytes` is a valid prefix
    /// of a message that has not fully arrived yet.
    fn represent(&self, bytes: &[u8]) -> Result<String, PresentationError>;
}

/// Presentation errors
#[derive(Error, Debug)]
pub enum PresentationError {
    /// Text holds a character the encoding cannot represent
    #[error("cannot encode {character:?} as {encoding}")]
    Encoding {
        encoding: &'static str,
        character: char,
    },

    /// Bytes are not valid under the encoding
    #[error("invalid {encoding} data: {reason}")]
    Decoding {
        encoding: &'static str,
        reason: String,
    },

    /// Bytes are not a valid compressed stream
    #[error("decompression failed: {0}")]
    Decompression(std::io::Error),

    /// Compressor failed while writing
    #[error("compression failed: {0}")]
    Compression(std::io::Error),

    /// Decompressed message is over the configured cap
    #[error("decompressed message exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// Input ended before a complete message
    #[error("incomplete message")]
    Incomplete,
}

impl PresentationError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, PresentationError::Incomplete)
    }
}

/// Build the presenter selected by configuration.
pub fn from_config(config: &PresentationConfig) -> Box<dyn Presenter> {
    match config.codec {
        CodecType::Gzip => Box::new(
            GzipPresenter::new(config.encoding, config.compression_level)
                .with_max_decoded(config.max_decoded_size),
        ),
        CodecType::Plain => Box::new(PlainPresenter::new(config.encoding)),
    }
}
