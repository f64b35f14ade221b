//! Named text encodings for channel payloads.
//!
//! Outbound text is converted to bytes with [`Encoding::encode`]. Inbound
//! bytes are converted back to text by a [`Decoder`], which is stateful:
//! a multi-byte character (or a base64 group) split across two deliveries
//! is held back until the rest of it arrives.
//!
//! # Example
//!
//! ```rust
//! use memstream::encoding::{Decoder, Encoding};
//!
//! let bytes = Encoding::Utf8.encode("héllo").unwrap();
//! let mut decoder = Decoder::new(Encoding::Utf8);
//!
//! // Split inside the two-byte 'é'
//! assert_eq!(decoder.write(&bytes[..2]), "h");
//! assert_eq!(decoder.write(&bytes[2..]), "éllo");
//! ```

use core::fmt;
use core::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::error::{Error, Result};

/// A named character encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    /// 7-bit ASCII; the high bit is dropped when decoding.
    Ascii,
    /// ISO-8859-1, one byte per code point. Also known as `binary`.
    Latin1,
    Base64,
    Hex,
    Utf16Le,
}

impl Encoding {
    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Ascii => "ascii",
            Encoding::Latin1 => "latin1",
            Encoding::Base64 => "base64",
            Encoding::Hex => "hex",
            Encoding::Utf16Le => "utf16le",
        }
    }

    /// Converts text to its byte representation in this encoding.
    ///
    /// ASCII and Latin-1 keep the low byte of each code point. Base64 and
    /// hex text is decoded and fails with [`Error::InvalidEncoding`] when
    /// malformed.
    pub fn encode(&self, text: &str) -> Result<Bytes> {
        let bytes: Vec<u8> = match self {
            Encoding::Utf8 => return Ok(Bytes::copy_from_slice(text.as_bytes())),
            Encoding::Ascii | Encoding::Latin1 => {
                text.chars().map(|c| (c as u32 & 0xFF) as u8).collect()
            }
            Encoding::Base64 => STANDARD.decode(text).map_err(|e| self.invalid(e))?,
            Encoding::Hex => hex::decode(text).map_err(|e| self.invalid(e))?,
            Encoding::Utf16Le => text
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect(),
        };
        Ok(Bytes::from(bytes))
    }

    fn invalid(&self, reason: impl fmt::Display) -> Error {
        Error::InvalidEncoding {
            encoding: self.name(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "ascii" => Ok(Encoding::Ascii),
            "latin1" | "binary" => Ok(Encoding::Latin1),
            "base64" => Ok(Encoding::Base64),
            "hex" => Ok(Encoding::Hex),
            "utf16le" | "utf-16le" | "ucs2" | "ucs-2" => Ok(Encoding::Utf16Le),
            _ => Err(Error::UnknownEncoding(name.to_string())),
        }
    }
}

/// Stateful byte to text converter.
#[derive(Debug, Clone)]
pub struct Decoder {
    encoding: Encoding,

    /// Bytes held back from the previous `write` (incomplete sequence).
    pending: Vec<u8>,
}

impl Decoder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            pending: Vec::new(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Number of bytes buffered waiting for the rest of a sequence.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Decodes one chunk, returning whatever text is complete so far.
    ///
    /// The result may be empty when the whole chunk was held back.
    pub fn write(&mut self, data: &[u8]) -> String {
        match self.encoding {
            Encoding::Ascii => data.iter().map(|&b| (b & 0x7F) as char).collect(),
            Encoding::Latin1 => data.iter().map(|&b| b as char).collect(),
            Encoding::Hex => hex::encode(data),
            Encoding::Utf8 => {
                let buf = self.take_with(data);
                let cut = buf.len() - incomplete_utf8_tail(&buf);
                self.pending.extend_from_slice(&buf[cut..]);
                String::from_utf8_lossy(&buf[..cut]).into_owned()
            }
            Encoding::Base64 => {
                let buf = self.take_with(data);
                let cut = buf.len() - buf.len() % 3;
                self.pending.extend_from_slice(&buf[cut..]);
                STANDARD.encode(&buf[..cut])
            }
            Encoding::Utf16Le => {
                let buf = self.take_with(data);
                let mut cut = buf.len() & !1;
                // Hold back a trailing high surrogate until its pair arrives
                if cut >= 2 {
                    let last = u16::from_le_bytes([buf[cut - 2], buf[cut - 1]]);
                    if (0xD800..=0xDBFF).contains(&last) {
                        cut -= 2;
                    }
                }
                self.pending.extend_from_slice(&buf[cut..]);
                decode_utf16le(&buf[..cut])
            }
        }
    }

    /// Flushes any held-back bytes, replacing incomplete sequences.
    pub fn end(&mut self) -> String {
        let rest = core::mem::take(&mut self.pending);
        if rest.is_empty() {
            return String::new();
        }
        match self.encoding {
            Encoding::Utf8 => String::from_utf8_lossy(&rest).into_owned(),
            Encoding::Base64 => STANDARD.encode(&rest),
            Encoding::Utf16Le => {
                let mut text = decode_utf16le(&rest[..rest.len() & !1]);
                if rest.len() % 2 == 1 {
                    text.push(char::REPLACEMENT_CHARACTER);
                }
                text
            }
            Encoding::Ascii | Encoding::Latin1 | Encoding::Hex => String::new(),
        }
    }

    fn take_with(&mut self, data: &[u8]) -> Vec<u8> {
        let mut buf = core::mem::take(&mut self.pending);
        buf.extend_from_slice(data);
        buf
    }
}

/// Length of a trailing UTF-8 sequence that is started but not finished.
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("utf8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("binary".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert_eq!("ucs2".parse::<Encoding>().unwrap(), Encoding::Utf16Le);

        let err = "ebcdic".parse::<Encoding>().unwrap_err();
        assert_eq!(err, Error::UnknownEncoding("ebcdic".into()));
    }

    #[test]
    fn test_utf8_split_sequence() {
        let bytes = Encoding::Utf8.encode("a€b").unwrap();
        assert_eq!(bytes.len(), 5);

        let mut decoder = Decoder::new(Encoding::Utf8);
        assert_eq!(decoder.write(&bytes[..2]), "a");
        assert_eq!(decoder.buffered(), 1);
        assert_eq!(decoder.write(&bytes[2..3]), "");
        assert_eq!(decoder.buffered(), 2);
        assert_eq!(decoder.write(&bytes[3..]), "€b");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_utf8_end_flushes_partial() {
        let mut decoder = Decoder::new(Encoding::Utf8);
        assert_eq!(decoder.write(&[b'x', 0xE2, 0x82]), "x");
        assert_eq!(decoder.end(), "\u{FFFD}");
        assert_eq!(decoder.end(), "");
    }

    #[test]
    fn test_base64_groups() {
        let mut decoder = Decoder::new(Encoding::Base64);
        assert_eq!(decoder.write(b"he"), "");
        assert_eq!(decoder.write(b"llo"), "aGVs");
        assert_eq!(decoder.end(), "bG8=");

        assert_eq!(
            Encoding::Base64.encode("aGVsbG8=").unwrap(),
            Bytes::from_static(b"hello")
        );
        let err = Encoding::Base64.encode("not base64!").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidEncoding);
    }

    #[test]
    fn test_hex_and_latin1() {
        assert_eq!(Encoding::Hex.encode("cafe").unwrap(), Bytes::from_static(&[0xCA, 0xFE]));
        assert!(Encoding::Hex.encode("xyz").is_err());
        assert_eq!(Decoder::new(Encoding::Hex).write(&[0xCA, 0xFE]), "cafe");

        assert_eq!(Encoding::Latin1.encode("é").unwrap(), Bytes::from_static(&[0xE9]));
        assert_eq!(Decoder::new(Encoding::Latin1).write(&[0xE9]), "é");
        assert_eq!(Decoder::new(Encoding::Ascii).write(&[0xE9]), "i");
    }

    #[test]
    fn test_utf16le_surrogate_split() {
        let bytes = Encoding::Utf16Le.encode("a😀").unwrap();
        assert_eq!(bytes.len(), 6);

        let mut decoder = Decoder::new(Encoding::Utf16Le);
        assert_eq!(decoder.write(&bytes[..3]), "a");
        assert_eq!(decoder.write(&bytes[3..4]), "");
        assert_eq!(decoder.write(&bytes[4..]), "😀");
    }
}
