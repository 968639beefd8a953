//! BitTorrent metainfo files.
//!
//! Only `announce`, `announce-list` and `info` survive cleaning; every other
//! top-level key (creator, comment, creation date, ...) is reported and
//! dropped. The bencode decoder is strict so that re-encoding is exact.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use super::{LeafFile, leaf_paths};
use crate::cleaner::{Cleaner, Metadata};
use crate::{Error, Result};

const ALLOWED_KEYS: &[&[u8]] = &[b"announce", b"announce-list", b"info"];

/// Nesting limit for lists and dictionaries.
const MAX_DEPTH: usize = 256;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bencode {
    /// `i<n>e`
    Int(i64),
    /// `<len>:<bytes>`
    Bytes(Vec<u8>),
    /// `l...e`
    List(Vec<Bencode>),
    /// `d...e`, keys kept sorted.
    Dict(BTreeMap<Vec<u8>, Bencode>),
}

impl Bencode {
    /// Decodes a complete bencoded value. Trailing bytes are an error.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut decoder = Decoder { data, pos: 0 };
        let value = decoder.value(0)?;
        if decoder.pos != data.len() {
            return Err(invalid("data after the top-level value"));
        }
        Ok(value)
    }

    /// Encodes the value; dictionary keys come out sorted.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Bencode::Int(n) => {
                out.push(b'i');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'e');
            }
            Bencode::Bytes(b) => encode_bytes(b, out),
            Bencode::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Bencode::Dict(entries) => {
                out.push(b'd');
                for (k, v) in entries {
                    encode_bytes(k, out);
                    v.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }
}

fn encode_bytes(b: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(b);
}

impl fmt::Display for Bencode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bencode::Int(n) => write!(f, "{}", n),
            Bencode::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Bencode::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Bencode::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", String::from_utf8_lossy(k), v)?;
                }
                f.write_str("}")
            }
        }
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::invalid_data("bencode", reason)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| invalid("unexpected end of data"))
    }

    fn value(&mut self, depth: usize) -> Result<Bencode> {
        if depth > MAX_DEPTH {
            return Err(invalid("nesting too deep"));
        }
        match self.peek()? {
            b'i' => self.int().map(Bencode::Int),
            b'0'..=b'9' => self.bytes().map(Bencode::Bytes),
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Bencode::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut entries = BTreeMap::new();
                while self.peek()? != b'e' {
                    let key = self.bytes()?;
                    let value = self.value(depth + 1)?;
                    entries.insert(key, value);
                }
                self.pos += 1;
                Ok(Bencode::Dict(entries))
            }
            other => Err(invalid(format!("unexpected byte 0x{:02x}", other))),
        }
    }

    /// Reads digits up to `terminator`, consuming it.
    fn digits_until(&mut self, terminator: u8) -> Result<&'a [u8]> {
        let start = self.pos;
        let data = self.data;
        let len = data[start..]
            .iter()
            .position(|b| *b == terminator)
            .ok_or_else(|| invalid("unterminated number"))?;
        self.pos = start + len + 1;
        Ok(&data[start..start + len])
    }

    fn int(&mut self) -> Result<i64> {
        self.pos += 1;
        let digits = self.digits_until(b'e')?;
        let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
        if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
            return Err(invalid("malformed integer"));
        }
        if digits.starts_with(b"-0") {
            return Err(invalid("negative zero"));
        }
        if unsigned.len() > 1 && unsigned[0] == b'0' {
            return Err(invalid("leading zero in integer"));
        }
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| invalid("integer out of range"))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let digits = self.digits_until(b':')?;
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(invalid("malformed string length"));
        }
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(invalid("leading zero in string length"));
        }
        let len: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| invalid("string length out of range"))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| invalid("string runs past the end of data"))?;
        let value = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(value)
    }
}

/// Cleaner for `.torrent` files.
#[derive(Debug)]
pub struct TorrentCleaner {
    file: LeafFile,
    root: BTreeMap<Vec<u8>, Bencode>,
}

impl TorrentCleaner {
    /// Decodes the file; it must hold a single bencoded dictionary.
    pub fn new(path: &Path) -> Result<Self> {
        let file = LeafFile::new(path);
        let root = match Bencode::decode(&file.read()?)? {
            Bencode::Dict(entries) => entries,
            _ => return Err(invalid("top-level value is not a dictionary")),
        };
        Ok(Self { file, root })
    }
}

impl Cleaner for TorrentCleaner {
    leaf_paths!();

    fn get_meta(&self) -> Result<Metadata> {
        Ok(self
            .root
            .iter()
            .filter(|(k, _)| !ALLOWED_KEYS.contains(&k.as_slice()))
            .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), v.to_string().into()))
            .collect())
    }

    fn remove_all(&mut self) -> Result<()> {
        let cleaned: BTreeMap<Vec<u8>, Bencode> = self
            .root
            .iter()
            .filter(|(k, _)| ALLOWED_KEYS.contains(&k.as_slice()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.file.write_output(&Bencode::Dict(cleaned).encode())
    }
}
