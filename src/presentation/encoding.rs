//! Text encodings supported by the presentation layer.

use super::PresentationError;
use std::fmt;
use std::str::FromStr;

/// Character encoding applied before compression and after decompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// 7-bit US-ASCII.
    Ascii,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
}

impl TextEncoding {
    /// Canonical name, as used in configuration and error messages.
    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Ascii => "ascii",
            TextEncoding::Latin1 => "latin-1",
        }
    }

    /// Encode `text` into bytes.
    ///
    /// Fails on the first character the encoding cannot represent.
    pub fn encode(self, text: &str) -> Result<Vec<u8>, PresentationError> {
        match self {
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Ascii => self.encode_narrow(text, 0x7f),
            TextEncoding::Latin1 => self.encode_narrow(text, 0xff),
        }
    }

    /// Decode `bytes` into text.
    ///
    /// UTF-8 input that stops in the middle of a multi-byte sequence yields
    /// `PresentationError::Incomplete` so the caller can read more.
    pub fn decode(self, bytes: &[u8]) -> Result<String, PresentationError> {
        match self {
            TextEncoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(text) => Ok(text.to_owned()),
                Err(e) if e.error_len().is_none() => Err(PresentationError::Incomplete),
                Err(e) => Err(PresentationError::Decoding {
                    encoding: self.name(),
                    reason: e.to_string(),
                }),
            },
            TextEncoding::Ascii => {
                if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
                    return Err(PresentationError::Decoding {
                        encoding: self.name(),
                        reason: format!("byte 0x{:02x} at offset {pos} is not ascii", bytes[pos]),
                    });
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    /// Decode bytes known to be a whole message.
    ///
    /// A trailing partial UTF-8 sequence is a decoding error here, never
    /// `Incomplete`: no further bytes can complete it.
    pub fn decode_complete(self, bytes: &[u8]) -> Result<String, PresentationError> {
        match self.decode(bytes) {
            Err(PresentationError::Incomplete) => Err(PresentationError::Decoding {
                encoding: self.name(),
                reason: format!(
                    "message ends inside a multi-byte sequence after {} bytes",
                    bytes.len()
                ),
            }),
            other => other,
        }
    }

    fn encode_narrow(self, text: &str, max: u32) -> Result<Vec<u8>, PresentationError> {
        text.chars()
            .map(|c| {
                if (c as u32) <= max {
                    Ok(c as u8)
                } else {
                    Err(PresentationError::Encoding {
                        encoding: self.name(),
                        character: c,
                    })
                }
            })
            .collect()
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "ascii" | "us-ascii" => Ok(TextEncoding::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            other => Err(format!("unknown text encoding '{other}'")),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
