//! FLAC audio.
//!
//! Cleaning keeps the STREAMINFO block, marked as the last metadata block,
//! followed by the untouched audio frames. Vorbis comments, embedded
//! pictures, seek tables, application blocks and any ID3v2 prefix are
//! dropped.

use std::fs;
use std::path::Path;

use super::{LeafFile, leaf_paths};
use crate::cleaner::{Cleaner, MetaValue, Metadata};
use crate::dispatch;
use crate::policy::CleanOptions;
use crate::{Error, Result};

const MAGIC: &[u8; 4] = b"fLaC";
const STREAMINFO_LEN: usize = 34;

const BLOCK_STREAMINFO: u8 = 0;
const BLOCK_VORBIS_COMMENT: u8 = 4;
const BLOCK_PICTURE: u8 = 6;
const BLOCK_INVALID: u8 = 127;

/// Reported for embedded pictures no cleaner understands.
const HARMFUL_DATA: &str = "harmful data";

fn invalid(reason: impl Into<String>) -> Error {
    Error::invalid_data("FLAC", reason)
}

#[derive(Debug, Clone)]
struct Block {
    kind: u8,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Stream {
    /// Length of an ID3v2 tag found before the magic.
    id3_len: usize,
    blocks: Vec<Block>,
    frames: Vec<u8>,
}

/// Length of an ID3v2 tag at the start of `data`, 0 if there is none.
fn id3v2_len(data: &[u8]) -> Result<usize> {
    let Some(header) = data.get(..10).filter(|h| h.starts_with(b"ID3")) else {
        return Ok(0);
    };
    let size_bytes = &header[6..10];
    if size_bytes.iter().any(|b| b & 0x80 != 0) {
        return Err(invalid("malformed ID3v2 size"));
    }
    let size = size_bytes.iter().fold(0usize, |acc, b| (acc << 7) | *b as usize);
    let footer = if header[5] & 0x10 != 0 { 10 } else { 0 };
    Ok(10 + size + footer)
}

fn parse(data: &[u8]) -> Result<Stream> {
    let id3_len = id3v2_len(data)?;
    let mut pos = id3_len;
    if data.get(pos..pos + 4) != Some(&MAGIC[..]) {
        return Err(invalid("missing fLaC marker"));
    }
    pos += 4;

    let mut blocks = Vec::new();
    loop {
        let header = data
            .get(pos..pos + 4)
            .ok_or_else(|| invalid("truncated metadata block header"))?;
        let last = header[0] & 0x80 != 0;
        let kind = header[0] & 0x7F;
        let len = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        if kind == BLOCK_INVALID {
            return Err(invalid("invalid metadata block type"));
        }
        if blocks.is_empty() && (kind != BLOCK_STREAMINFO || len != STREAMINFO_LEN) {
            return Err(invalid("first metadata block is not STREAMINFO"));
        }
        let body = data
            .get(pos + 4..pos + 4 + len)
            .ok_or_else(|| invalid("truncated metadata block"))?;
        blocks.push(Block {
            kind,
            data: body.to_vec(),
        });
        pos += 4 + len;
        if last {
            break;
        }
    }

    Ok(Stream {
        id3_len,
        blocks,
        frames: data[pos..].to_vec(),
    })
}

/// Cursor over a metadata block body.
struct BlockReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn word(&mut self) -> Option<[u8; 4]> {
        let bytes = self.bytes(4)?;
        bytes.try_into().ok()
    }

    /// Vorbis comment fields are little-endian.
    fn u32_le(&mut self) -> Option<u32> {
        self.word().map(u32::from_le_bytes)
    }

    fn u32_be(&mut self) -> Option<u32> {
        self.word().map(u32::from_be_bytes)
    }

    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let data = self.data;
        let out = data.get(self.pos..self.pos.checked_add(len)?)?;
        self.pos += len;
        Some(out)
    }
}

/// Decodes `KEY=value` pairs, lowercasing keys and joining repeats.
fn vorbis_comments(block: &[u8]) -> Option<Vec<(String, String)>> {
    let mut reader = BlockReader::new(block);
    let vendor_len = reader.u32_le()? as usize;
    reader.bytes(vendor_len)?;
    let count = reader.u32_le()?;
    let mut out: Vec<(String, String)> = Vec::new();
    for _ in 0..count {
        let len = reader.u32_le()? as usize;
        let entry = String::from_utf8_lossy(reader.bytes(len)?).into_owned();
        let (key, value) = entry.split_once('=')?;
        let key = key.to_lowercase();
        match out.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => out.push((key, value.to_string())),
        }
    }
    Some(out)
}

/// An embedded picture: `(mime type, description, data)`.
fn picture(block: &[u8]) -> Option<(String, String, &[u8])> {
    let mut reader = BlockReader::new(block);
    reader.u32_be()?;
    let mime_len = reader.u32_be()? as usize;
    let mime = String::from_utf8_lossy(reader.bytes(mime_len)?).into_owned();
    let desc_len = reader.u32_be()? as usize;
    let desc = String::from_utf8_lossy(reader.bytes(desc_len)?).into_owned();
    // width, height, depth, colors
    reader.bytes(16)?;
    let data_len = reader.u32_be()? as usize;
    Some((mime, desc, reader.bytes(data_len)?))
}

fn picture_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        other => mime_guess::get_mime_extensions_str(other).and_then(|e| e.first().copied()),
    }
}

/// Metadata of an embedded picture, through whichever cleaner handles it.
fn picture_metadata(mime: &str, data: &[u8]) -> Result<MetaValue> {
    let Some(extension) = picture_extension(mime) else {
        return Ok(HARMFUL_DATA.into());
    };
    let scratch = tempfile::Builder::new().prefix("metastrip-").tempdir()?;
    let file = scratch.path().join(format!("picture.{}", extension));
    fs::write(&file, data)?;
    let (cleaner, _) = dispatch::dispatch(&file, &CleanOptions::default());
    let Some(cleaner) = cleaner else {
        return Ok(HARMFUL_DATA.into());
    };
    let meta = cleaner.get_meta()?;
    Ok(if meta.is_empty() { "harmless".into() } else { meta.into() })
}

/// Cleaner for FLAC audio.
#[derive(Debug)]
pub struct FlacCleaner {
    file: LeafFile,
    stream: Stream,
}

impl FlacCleaner {
    /// Parses the metadata blocks.
    pub fn new(path: &Path) -> Result<Self> {
        let file = LeafFile::new(path);
        let stream = parse(&file.read()?)?;
        Ok(Self { file, stream })
    }
}

impl Cleaner for FlacCleaner {
    leaf_paths!();

    fn get_meta(&self) -> Result<Metadata> {
        let mut meta = Metadata::new();
        if self.stream.id3_len > 0 {
            meta.insert("id3v2".into(), format!("{} bytes", self.stream.id3_len).into());
        }
        let mut pictures = 0;
        for block in &self.stream.blocks {
            match block.kind {
                BLOCK_VORBIS_COMMENT => {
                    let comments = vorbis_comments(&block.data)
                        .ok_or_else(|| invalid("malformed Vorbis comment block"))?;
                    meta.extend(comments.into_iter().map(|(k, v)| (k, v.into())));
                }
                BLOCK_PICTURE => {
                    let (mime, desc, data) =
                        picture(&block.data).ok_or_else(|| invalid("malformed picture block"))?;
                    let name = if desc.is_empty() {
                        format!("Cover {}", pictures)
                    } else {
                        desc
                    };
                    pictures += 1;
                    meta.insert(name, picture_metadata(&mime, data)?);
                }
                _ => {}
            }
        }
        Ok(meta)
    }

    fn remove_all(&mut self) -> Result<()> {
        let streaminfo = &self.stream.blocks[0];
        let mut out = Vec::with_capacity(8 + STREAMINFO_LEN + self.stream.frames.len());
        out.extend_from_slice(MAGIC);
        out.push(0x80 | BLOCK_STREAMINFO);
        out.extend_from_slice(&(streaminfo.data.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(&streaminfo.data);
        out.extend_from_slice(&self.stream.frames);
        self.file.write_output(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: u8, last: bool, data: &[u8]) -> Vec<u8> {
        let mut out = vec![kind | if last { 0x80 } else { 0 }];
        out.extend_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(data);
        out
    }

    fn comments(entries: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&6u32.to_le_bytes());
        out.extend_from_slice(b"vendor");
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for entry in entries {
            out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            out.extend_from_slice(entry.as_bytes());
        }
        out
    }

    fn sample() -> Vec<u8> {
        let mut data = MAGIC.to_vec();
        data.extend(block(BLOCK_STREAMINFO, false, &[7; STREAMINFO_LEN]));
        data.extend(block(BLOCK_VORBIS_COMMENT, false, &comments(&["ARTIST=jvoisin", "Title=x", "artist=other"])));
        data.extend(block(1, true, &[0; 16]));
        data.extend_from_slice(&[0xFF, 0xF8, 1, 2, 3]);
        data
    }

    #[test]
    fn test_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.flac");
        fs::write(&input, sample()).unwrap();

        let meta = FlacCleaner::new(&input).unwrap().get_meta().unwrap();
        assert_eq!(meta["artist"].as_text(), Some("jvoisin, other"));
        assert_eq!(meta["title"].as_text(), Some("x"));
    }

    #[test]
    fn test_clean_keeps_streaminfo_and_frames() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.flac");
        fs::write(&input, sample()).unwrap();

        let mut cleaner = FlacCleaner::new(&input).unwrap();
        cleaner.remove_all().unwrap();
        let out = fs::read(cleaner.output_path()).unwrap();

        let mut expected = MAGIC.to_vec();
        expected.extend(block(BLOCK_STREAMINFO, true, &[7; STREAMINFO_LEN]));
        expected.extend_from_slice(&[0xFF, 0xF8, 1, 2, 3]);
        assert_eq!(out, expected);
        assert!(FlacCleaner::new(cleaner.output_path()).unwrap().get_meta().unwrap().is_empty());
    }

    #[test]
    fn test_id3_prefix_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.flac");
        let mut data = b"ID3\x03\x00\x00\x00\x00\x00\x04TAG!".to_vec();
        data.extend(sample());
        fs::write(&input, data).unwrap();

        let mut cleaner = FlacCleaner::new(&input).unwrap();
        assert!(cleaner.get_meta().unwrap().contains_key("id3v2"));
        cleaner.remove_all().unwrap();
        assert!(fs::read(cleaner.output_path()).unwrap().starts_with(MAGIC));
    }

    #[test]
    fn test_unknown_picture_type() {
        let mut pic = Vec::new();
        pic.extend_from_slice(&3u32.to_be_bytes());
        pic.extend_from_slice(&(b"application/x-nothing".len() as u32).to_be_bytes());
        pic.extend_from_slice(b"application/x-nothing");
        pic.extend_from_slice(&0u32.to_be_bytes());
        pic.extend_from_slice(&[0; 16]);
        pic.extend_from_slice(&3u32.to_be_bytes());
        pic.extend_from_slice(b"abc");

        let (mime, desc, data) = picture(&pic).unwrap();
        assert_eq!(mime, "application/x-nothing");
        assert!(desc.is_empty());
        assert_eq!(data, b"abc");
        assert_eq!(picture_metadata(&mime, data).unwrap(), MetaValue::from(HARMFUL_DATA));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse(b"OggS").is_err());
        let mut bad = MAGIC.to_vec();
        bad.extend(block(BLOCK_VORBIS_COMMENT, true, &comments(&[])));
        assert!(parse(&bad).is_err());
        let mut truncated = MAGIC.to_vec();
        truncated.extend(&block(BLOCK_STREAMINFO, true, &[7; STREAMINFO_LEN])[..20]);
        assert!(parse(&truncated).is_err());
    }
}
