//! Text encodings for chunks.
//!
//! When a session is configured with an encoding, raw bytes are decoded
//! before they are handed to the consumer. Reads split the file at arbitrary
//! byte positions, so the decoder carries incomplete multi-byte sequences
//! over to the next chunk instead of mangling them.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

/// Supported text encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Encoding {
    Utf8,
    /// 7-bit ASCII; the high bit of every byte is dropped.
    Ascii,
    /// ISO-8859-1, one byte per code point.
    Latin1,
    Utf16Le,
    /// Lowercase hexadecimal dump of the raw bytes.
    Hex,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Ascii => "ascii",
            Encoding::Latin1 => "latin1",
            Encoding::Utf16Le => "utf16le",
            Encoding::Hex => "hex",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "ascii" => Ok(Encoding::Ascii),
            "latin1" | "binary" | "iso-8859-1" => Ok(Encoding::Latin1),
            "utf16le" | "utf-16le" | "ucs2" | "ucs-2" => Ok(Encoding::Utf16Le),
            "hex" => Ok(Encoding::Hex),
            other => Err(format!(
                "unknown encoding '{}' (expected utf8, ascii, latin1, utf16le or hex)",
                other
            )),
        }
    }
}

impl TryFrom<String> for Encoding {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Incremental decoder for one byte stream.
#[derive(Debug)]
pub struct TextDecoder {
    encoding: Encoding,
    /// Bytes of an incomplete sequence left over from the previous chunk.
    carry: Vec<u8>,
}

impl TextDecoder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            carry: Vec::new(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Decode the next piece of the stream.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        match self.encoding {
            Encoding::Utf8 => self.decode_utf8(bytes),
            Encoding::Ascii => bytes.iter().map(|&b| (b & 0x7f) as char).collect(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Encoding::Utf16Le => self.decode_utf16le(bytes),
            Encoding::Hex => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }

    /// Flush whatever incomplete sequence is still carried. Called at the end
    /// of the stream and when the underlying file is replaced.
    pub fn finish(&mut self) -> String {
        if self.carry.is_empty() {
            String::new()
        } else {
            self.carry.clear();
            REPLACEMENT.to_string()
        }
    }

    fn decode_utf8(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(REPLACEMENT);
                            rest = &after[bad..];
                        }
                        None => {
                            // Sequence cut off by the end of this chunk.
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn decode_utf16le(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(bytes);

        let mut units: Vec<u16> = input
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let mut carry = input.chunks_exact(2).remainder().to_vec();

        // A trailing high surrogate needs its partner from the next chunk.
        if let Some(&last) = units.last() {
            if (0xD800..0xDC00).contains(&last) {
                units.pop();
                let mut held = last.to_le_bytes().to_vec();
                held.extend_from_slice(&carry);
                carry = held;
            }
        }
        self.carry = carry;

        char::decode_utf16(units)
            .map(|r| r.unwrap_or(REPLACEMENT))
            .collect()
    }
}
