//! PNG images.
//!
//! The chunk stream is validated (signature, CRCs, IHDR first, IEND last) at
//! construction. Lightweight cleaning rewrites the stream keeping only the
//! chunks needed to render the image; deep cleaning decodes and re-encodes
//! the pixels when the `images` feature is enabled.

use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;

use super::{LeafFile, exif_metadata, leaf_paths};
use crate::cleaner::{Cleaner, HARMFUL_CONTENT, Metadata};
use crate::{Error, Result};

const SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Chunks that survive lightweight cleaning.
const KEPT_CHUNKS: &[&[u8; 4]] = &[
    b"IHDR", b"PLTE", b"IDAT", b"IEND", b"tRNS", b"gAMA", b"cHRM", b"sRGB",
];

/// Standard ancillary chunks that describe the image and are not reported.
const DESCRIPTIVE_CHUNKS: &[&[u8; 4]] = &[b"bKGD", b"hIST", b"pHYs", b"sBIT", b"sPLT"];

/// Upper bound for inflated text chunks.
const MAX_TEXT_LEN: u64 = 16 * 1024 * 1024;

fn invalid(reason: impl Into<String>) -> Error {
    Error::invalid_data("PNG", reason)
}

#[derive(Debug, Clone)]
struct Chunk {
    kind: [u8; 4],
    data: Vec<u8>,
}

impl Chunk {
    fn name(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32> {
    data.get(pos..pos + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| invalid("truncated chunk"))
}

fn chunk_crc(kind: &[u8; 4], data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    hasher.finalize()
}

/// Splits a PNG stream into chunks, checking its structure.
fn parse_chunks(data: &[u8]) -> Result<Vec<Chunk>> {
    if !data.starts_with(SIGNATURE) {
        return Err(invalid("missing PNG signature"));
    }
    let mut pos = SIGNATURE.len();
    let mut chunks = Vec::new();
    loop {
        let len = read_u32(data, pos)? as usize;
        if len > i32::MAX as usize {
            return Err(invalid("chunk length out of range"));
        }
        let kind: [u8; 4] = data
            .get(pos + 4..pos + 8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| invalid("truncated chunk"))?;
        let body = data
            .get(pos + 8..pos + 8 + len)
            .ok_or_else(|| invalid("truncated chunk"))?;
        let crc = read_u32(data, pos + 8 + len)?;
        if crc != chunk_crc(&kind, body) {
            return Err(invalid(format!("bad CRC in {} chunk", String::from_utf8_lossy(&kind))));
        }
        pos += 12 + len;

        if chunks.is_empty() && (&kind != b"IHDR" || len != 13) {
            return Err(invalid("first chunk is not a valid IHDR"));
        }
        let last = &kind == b"IEND";
        chunks.push(Chunk {
            kind,
            data: body.to_vec(),
        });
        if last {
            break;
        }
    }
    if pos != data.len() {
        log::debug!("ignoring {} bytes after IEND", data.len() - pos);
    }
    if !chunks.iter().any(|c| &c.kind == b"IDAT") {
        return Err(invalid("no image data"));
    }
    Ok(chunks)
}

fn write_chunks<'a>(chunks: impl Iterator<Item = &'a Chunk>) -> Vec<u8> {
    let mut out = SIGNATURE.to_vec();
    for chunk in chunks {
        out.extend_from_slice(&(chunk.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&chunk.kind);
        out.extend_from_slice(&chunk.data);
        out.extend_from_slice(&chunk_crc(&chunk.kind, &chunk.data).to_be_bytes());
    }
    out
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .take(MAX_TEXT_LEN)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}

/// Splits `data` at the first NUL byte.
fn split_nul(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let at = data.iter().position(|b| *b == 0)?;
    Some((&data[..at], &data[at + 1..]))
}

/// Decodes a tEXt, zTXt or iTXt chunk into `(keyword, text)`.
fn text_entry(chunk: &Chunk) -> Option<(String, String)> {
    let (keyword, rest) = split_nul(&chunk.data)?;
    let keyword = latin1(keyword);
    match &chunk.kind {
        b"tEXt" => Some((keyword, latin1(rest))),
        b"zTXt" => {
            let (_method, compressed) = rest.split_first()?;
            Some((keyword, latin1(&inflate(compressed)?)))
        }
        b"iTXt" => {
            let [flag, _method, rest @ ..] = rest else {
                return None;
            };
            let (_language, rest) = split_nul(rest)?;
            let (_translated, text) = split_nul(rest)?;
            let text = if *flag == 1 { inflate(text)? } else { text.to_vec() };
            Some((keyword, String::from_utf8_lossy(&text).into_owned()))
        }
        _ => None,
    }
}

fn format_time(data: &[u8]) -> Option<String> {
    let [y0, y1, month, day, hour, minute, second] = data.try_into().ok()?;
    Some(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        u16::from_be_bytes([y0, y1]),
        month,
        day,
        hour,
        minute,
        second
    ))
}

/// Cleaner for PNG images.
#[derive(Debug)]
pub struct PngCleaner {
    file: LeafFile,
    chunks: Vec<Chunk>,
}

impl PngCleaner {
    /// Parses and validates the chunk stream.
    pub fn new(path: &Path) -> Result<Self> {
        let file = LeafFile::new(path);
        let chunks = parse_chunks(&file.read()?)?;
        Ok(Self { file, chunks })
    }

    fn lightweight_bytes(&self) -> Vec<u8> {
        write_chunks(self.chunks.iter().filter(|c| KEPT_CHUNKS.contains(&&c.kind)))
    }
}

impl Cleaner for PngCleaner {
    leaf_paths!();

    fn get_meta(&self) -> Result<Metadata> {
        let mut meta = Metadata::new();
        for chunk in &self.chunks {
            if KEPT_CHUNKS.contains(&&chunk.kind) || DESCRIPTIVE_CHUNKS.contains(&&chunk.kind) {
                continue;
            }
            match &chunk.kind {
                b"tEXt" | b"zTXt" | b"iTXt" => match text_entry(chunk) {
                    Some((k, v)) => meta.insert(k, v.into()),
                    None => meta.insert(chunk.name(), HARMFUL_CONTENT.into()),
                },
                b"tIME" => meta.insert(
                    "ModifyDate".into(),
                    format_time(&chunk.data).unwrap_or_else(|| HARMFUL_CONTENT.into()).into(),
                ),
                b"eXIf" => match exif_metadata(chunk.data.clone()) {
                    Ok(fields) => {
                        meta.extend(fields);
                        None
                    }
                    Err(_) => meta.insert("eXIf".into(), HARMFUL_CONTENT.into()),
                },
                b"iCCP" => meta.insert(
                    "ICCProfileName".into(),
                    latin1(split_nul(&chunk.data).map_or(&chunk.data[..], |(name, _)| name)).into(),
                ),
                _ => meta.insert(chunk.name(), format!("{} bytes", chunk.data.len()).into()),
            };
        }
        Ok(meta)
    }

    #[cfg(feature = "images")]
    fn remove_all(&mut self) -> Result<()> {
        use std::io::Cursor;

        let image = image::load_from_memory_with_format(&self.file.read()?, image::ImageFormat::Png)
            .map_err(|e| invalid(e.to_string()))?;
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| invalid(e.to_string()))?;
        self.file.write_output(out.get_ref())
    }

    #[cfg(not(feature = "images"))]
    fn remove_all(&mut self) -> Result<()> {
        self.remove_all_lightweight()
    }

    fn remove_all_lightweight(&mut self) -> Result<()> {
        self.file.write_output(&self.lightweight_bytes())
    }
}
