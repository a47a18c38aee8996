//! Pass-through presenter: text encoding only.

use super::{PresentationError, Presenter, TextEncoding};

/// Sends the encoded text as-is.
#[derive(Debug, Clone, Default)]
pub struct PlainPresenter {
    encoding: TextEncoding,
}

impl PlainPresenter {
    pub fn new(encoding: TextEncoding) -> Self {
        Self { encoding }
    }
}

impl Presenter for PlainPresenter {
    fn prepare(&self, text: &str) -> Result<Vec<u8>, PresentationError> {
        self.encoding.encode(text)
    }

    fn represent(&self, bytes: &[u8]) -> Result<String, PresentationError> {
        self.encoding.decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_bytes() {
        let presenter = PlainPresenter::default();
        assert_eq!(presenter.prepare("STOP").unwrap(), b"STOP");
        assert_eq!(presenter.represent(b"STOP").unwrap(), "STOP");
    }

    #[test]
    fn test_split_multibyte_is_incomplete() {
        let presenter = PlainPresenter::default();
        let bytes = presenter.prepare("na\u{ef}ve").unwrap();
        assert!(presenter.represent(&bytes[..3]).unwrap_err().is_incomplete());
        assert_eq!(presenter.represent(&bytes).unwrap(), "na\u{ef}ve");
    }
}
