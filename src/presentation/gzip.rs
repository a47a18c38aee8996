//! Gzip presenter: encode, then compress.

use super::{PresentationError, Presenter, TextEncoding};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Highest gzip compression level.
pub const MAX_LEVEL: u32 = 9;

/// Default cap on the size of one decompressed message.
pub const DEFAULT_MAX_DECODED: usize = 64 * 1024;

/// Encodes text with a `TextEncoding` and wraps the result in a gzip member.
#[derive(Debug, Clone)]
pub struct GzipPresenter {
    encoding: TextEncoding,
    level: u32,
    max_decoded: usize,
}

impl GzipPresenter {
    /// Create a presenter. `level` is clamped to `0..=9`; 1 is fastest,
    /// 9 compresses most.
    pub fn new(encoding: TextEncoding, level: u32) -> Self {
        Self {
            encoding,
            level: level.min(MAX_LEVEL),
            max_decoded: DEFAULT_MAX_DECODED,
        }
    }

    /// Reject members that inflate past `limit` bytes.
    pub fn with_max_decoded(mut self, limit: usize) -> Self {
        self.max_decoded = limit;
        self
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Presenter for GzipPresenter {
    fn prepare(&self, text: &str) -> Result<Vec<u8>, PresentationError> {
        let encoded = self.encoding.encode(text)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(&encoded)
            .map_err(PresentationError::Compression)?;
        encoder.finish().map_err(PresentationError::Compression)
    }

    fn represent(&self, bytes: &[u8]) -> Result<String, PresentationError> {
        // An empty read buffer is never a full member (header alone is 10 bytes)
        if bytes.is_empty() {
            return Err(PresentationError::Incomplete);
        }

        let mut decompressed = Vec::with_capacity(bytes.len() * 2);
        GzDecoder::new(bytes)
            .take(self.max_decoded as u64 + 1)
            .read_to_end(&mut decompressed)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => PresentationError::Incomplete,
                _ => PresentationError::Decompression(e),
            })?;

        if decompressed.len() > self.max_decoded {
            return Err(PresentationError::TooLarge {
                limit: self.max_decoded,
            });
        }

        // The member is whole, so a dangling multi-byte sequence is bad data
        self.encoding.decode_complete(&decompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_is_gzip() {
        let presenter = GzipPresenter::new(TextEncoding::Utf8, 1);
        let bytes = presenter.prepare("hello").unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert_eq!(presenter.represent(&bytes).unwrap(), "hello");
    }

    #[test]
    fn test_level_clamped() {
        assert_eq!(GzipPresenter::new(TextEncoding::Utf8, 42).level(), 9);
        assert_eq!(GzipPresenter::new(TextEncoding::Utf8, 0).level(), 0);
    }

    #[test]
    fn test_higher_level_not_larger_on_repetitive_text() {
        let text = "abcabcabc".repeat(200);
        let fast = GzipPresenter::new(TextEncoding::Utf8, 0).prepare(&text).unwrap();
        let best = GzipPresenter::new(TextEncoding::Utf8, 9).prepare(&text).unwrap();
        assert!(best.len() < fast.len());
    }

    #[test]
    fn test_not_gzip() {
        let presenter = GzipPresenter::new(TextEncoding::Utf8, 1);
        match presenter.represent(b"hello, plain text") {
            Err(PresentationError::Decompression(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_is_incomplete() {
        let presenter = GzipPresenter::new(TextEncoding::Utf8, 1);
        let bytes = presenter.prepare("hello world").unwrap();

        assert!(presenter.represent(&[]).unwrap_err().is_incomplete());
        assert!(presenter
            .represent(&bytes[..bytes.len() - 3])
            .unwrap_err()
            .is_incomplete());
        assert!(presenter.represent(&bytes[..4]).unwrap_err().is_incomplete());
    }

    fn gzip_raw(payload: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_gzip_invalid_utf8_is_decoding_error() {
        let presenter = GzipPresenter::new(TextEncoding::Utf8, 1);

        // Complete member whose content stops inside a 3-byte sequence
        match presenter.represent(&gzip_raw(&[b'a', 0xe2, 0x82])) {
            Err(PresentationError::Decoding { encoding, .. }) => assert_eq!(encoding, "utf-8"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            presenter.represent(&gzip_raw(&[0xff, 0xfe])),
            Err(PresentationError::Decoding { .. })
        ));
    }

    #[test]
    fn test_decompressed_size_capped() {
        let presenter = GzipPresenter::new(TextEncoding::Utf8, 1).with_max_decoded(1024);
        let bomb = gzip_raw(&[b'a'; 64 * 1024]);
        assert!(bomb.len() < 1024);
        assert!(matches!(
            presenter.represent(&bomb),
            Err(PresentationError::TooLarge { limit: 1024 })
        ));

        let exact = gzip_raw(&[b'a'; 1024]);
        assert_eq!(presenter.represent(&exact).unwrap().len(), 1024);
    }

    #[test]
    fn test_encoding_error_surfaces() {
        let presenter = GzipPresenter::new(TextEncoding::Ascii, 1);
        assert!(matches!(
            presenter.prepare("\u{1f980}"),
            Err(PresentationError::Encoding { .. })
        ));
    }
}
