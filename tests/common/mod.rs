//! Shared test utilities for integration tests.
//!
//! Container and media builders live here so every test file produces inputs
//! the same way. ZIP archives are assembled by hand (stored entries) so tests
//! control the per-entry records that the `zip` crate does not expose for
//! writing: host system, entry comment and timestamp.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// ZIP host byte written by Windows tools.
pub const HOST_DOS: u8 = 0;
/// ZIP host byte for Unix.
pub const HOST_UNIX: u8 = 3;

/// One entry of a hand-built ZIP archive.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub host: u8,
    pub comment: Vec<u8>,
    /// `(year, month, day, hour, minute, second)`.
    pub modified: (u16, u16, u16, u16, u16, u16),
    /// Unix mode, stored in the high half of the external attributes.
    pub unix_mode: Option<u32>,
}

impl RawEntry {
    /// A regular file as a Windows archiver would write it: DOS host,
    /// a comment and a real timestamp.
    pub fn windows(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            host: HOST_DOS,
            comment: b"written on my laptop".to_vec(),
            modified: (2018, 3, 20, 21, 59, 24),
            unix_mode: None,
        }
    }

    /// A Unix regular file with no comment.
    pub fn unix(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            host: HOST_UNIX,
            comment: Vec::new(),
            modified: (2018, 3, 20, 21, 59, 24),
            unix_mode: Some(0o100644),
        }
    }

    /// A Unix symbolic link.
    pub fn symlink(name: &str, target: &str) -> Self {
        Self {
            unix_mode: Some(0o120777),
            ..Self::unix(name, target.as_bytes())
        }
    }

    fn dos_time(&self) -> (u16, u16) {
        let (year, month, day, hour, minute, second) = self.modified;
        let date = ((year - 1980) << 9) | (month << 5) | day;
        let time = (hour << 11) | (minute << 5) | (second / 2);
        (date, time)
    }
}

/// Assembles a ZIP archive of stored entries.
pub fn raw_zip(entries: &[RawEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();

    for entry in entries {
        let offset = out.len() as u32;
        let crc = crc32fast::hash(&entry.data);
        let size = entry.data.len() as u32;
        let (date, time) = entry.dos_time();

        out.extend_from_slice(&[0x50, 0x4B, 0x03, 0x04]);
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // stored
        out.extend_from_slice(&time.to_le_bytes());
        out.extend_from_slice(&date.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(&entry.data);

        central.extend_from_slice(&[0x50, 0x4B, 0x01, 0x02]);
        central.extend_from_slice(&[20, entry.host]);
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&time.to_le_bytes());
        central.extend_from_slice(&date.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra
        central.extend_from_slice(&(entry.comment.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // disk
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
        central.extend_from_slice(&(entry.unix_mode.unwrap_or(0) << 16).to_le_bytes());
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(entry.name.as_bytes());
        central.extend_from_slice(&entry.comment);
    }

    let cd_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&[0x50, 0x4B, 0x05, 0x06]);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Builds a Windows-style ZIP from `(name, data)` pairs.
pub fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let entries: Vec<RawEntry> = entries
        .iter()
        .map(|(name, data)| RawEntry::windows(name, data))
        .collect();
    raw_zip(&entries)
}

/// Writes `data` to `dir/name` and returns the path.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

/// Content of one ZIP member.
pub fn zip_member(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    let mut data = Vec::new();
    archive.by_name(name).unwrap().read_to_end(&mut data).unwrap();
    data
}

/// Member names of a ZIP archive, in central directory order.
pub fn zip_names(path: &Path) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Office Open XML
// ---------------------------------------------------------------------------

pub const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

pub const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/comments.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.comments+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/><Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/></Types>"#;

pub const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

pub const CORE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:creator>Julien Voisin</dc:creator><cp:lastModifiedBy>jvoisin</cp:lastModifiedBy></cp:coreProperties>"#;

pub const APP: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties"><Application>Microsoft Office Word</Application></Properties>"#;

pub const COMMENTS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:comments xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:comment w:id="0" w:author="Reviewer"><w:p><w:r><w:t>secret remark</w:t></w:r></w:p></w:comment></w:comments>"#;

/// A `word/document.xml` with a tracked insertion and deletion.
pub fn document_with_revisions() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="{ns}" xmlns:mc="http://schemas.openxmlformats.org/markup-compatibility/2006" mc:Ignorable="w14"><w:body><w:p w:rsidR="00A1B2C3"><w:r><w:t>Hello </w:t></w:r><w:ins w:id="1" w:author="X" w:date="2018-06-20T19:03:00Z"><w:r><w:t>inserted text</w:t></w:r></w:ins><w:del w:id="2" w:author="X"><w:r><w:delText>removed text</w:delText></w:r></w:del><w:commentRangeStart w:id="0"/><w:r><w:t>world</w:t></w:r><w:commentRangeEnd w:id="0"/><w:r><w:commentReference w:id="0"/></w:r></w:p></w:body></w:document>"#,
        ns = W_NS
    )
}

/// A small docx carrying author metadata, a comment part and tracked changes.
pub fn docx() -> Vec<u8> {
    docx_with_document(&document_with_revisions())
}

/// The same docx around an arbitrary `word/document.xml`.
pub fn docx_with_document(document: &str) -> Vec<u8> {
    zip_of(&[
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", ROOT_RELS.as_bytes()),
        ("docProps/core.xml", CORE.as_bytes()),
        ("docProps/app.xml", APP.as_bytes()),
        ("word/document.xml", document.as_bytes()),
        ("word/comments.xml", COMMENTS.as_bytes()),
    ])
}

// ---------------------------------------------------------------------------
// OpenDocument
// ---------------------------------------------------------------------------

pub const ODT_MIMETYPE: &str = "application/vnd.oasis.opendocument.text";

pub const ODT_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest:manifest xmlns:manifest="urn:oasis:names:tc:opendocument:xmlns:manifest:1.0" manifest:version="1.2"><manifest:file-entry manifest:full-path="/" manifest:media-type="application/vnd.oasis.opendocument.text"/><manifest:file-entry manifest:full-path="content.xml" manifest:media-type="text/xml"/><manifest:file-entry manifest:full-path="meta.xml" manifest:media-type="text/xml"/></manifest:manifest>"#;

pub const ODT_CONTENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0" xmlns:dc="http://purl.org/dc/elements/1.1/"><office:body><office:text><text:tracked-changes><text:changed-region text:id="ct1"><text:insertion><office:change-info><dc:creator>Julien</dc:creator></office:change-info></text:insertion></text:changed-region></text:tracked-changes><text:p>Hello</text:p></office:text></office:body></office:document-content>"#;

pub const ODT_META: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-meta xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" xmlns:meta="urn:oasis:names:tc:opendocument:xmlns:meta:1.0" xmlns:dc="http://purl.org/dc/elements/1.1/"><office:meta><meta:generator>LibreOffice/6.0</meta:generator><dc:creator>Julien Voisin</dc:creator></office:meta></office:document-meta>"#;

/// An odt with members in producer order (mimetype not first).
pub fn odt() -> Vec<u8> {
    zip_of(&[
        ("content.xml", ODT_CONTENT.as_bytes()),
        ("meta.xml", ODT_META.as_bytes()),
        ("META-INF/manifest.xml", ODT_MANIFEST.as_bytes()),
        ("mimetype", ODT_MIMETYPE.as_bytes()),
    ])
}

// ---------------------------------------------------------------------------
// EPUB
// ---------------------------------------------------------------------------

pub const EPUB_CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#;

pub const EPUB_PACKAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="BookId"><metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf"><dc:title>Secret title</dc:title><dc:creator opf:role="aut">Julien Voisin</dc:creator><dc:identifier id="BookId">urn:uuid:0000</dc:identifier><dc:language>en</dc:language></metadata><manifest><item id="ch1" href="chapter1.xhtml" media-type="application/xhtml+xml"/></manifest><spine><itemref idref="ch1"/></spine></package>"#;

pub const EPUB_CHAPTER: &str = r#"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>One</title><meta name="generator" content="calibre"/></head><body><p>Once upon a time</p></body></html>"#;

/// An EPUB with metadata in the package document and a chapter.
pub fn epub(extra: &[(&str, &[u8])]) -> Vec<u8> {
    let mut entries = vec![
        ("mimetype", b"application/epub+zip".as_slice()),
        ("META-INF/container.xml", EPUB_CONTAINER.as_bytes()),
        ("OEBPS/content.opf", EPUB_PACKAGE.as_bytes()),
        ("OEBPS/chapter1.xhtml", EPUB_CHAPTER.as_bytes()),
    ];
    entries.extend_from_slice(extra);
    zip_of(&entries)
}

// ---------------------------------------------------------------------------
// Leaf formats
// ---------------------------------------------------------------------------

fn flac_block(kind: u8, last: bool, data: &[u8]) -> Vec<u8> {
    let mut out = vec![kind | if last { 0x80 } else { 0 }];
    out.extend_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(data);
    out
}

/// A FLAC stream with Vorbis comments and fake audio frames.
pub fn flac(comments: &[&str]) -> Vec<u8> {
    let mut vorbis = Vec::new();
    vorbis.extend_from_slice(&9u32.to_le_bytes());
    vorbis.extend_from_slice(b"reference");
    vorbis.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for comment in comments {
        vorbis.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        vorbis.extend_from_slice(comment.as_bytes());
    }

    let mut data = b"fLaC".to_vec();
    data.extend(flac_block(0, false, &[0x10; 34]));
    data.extend(flac_block(4, true, &vorbis));
    data.extend_from_slice(&[0xFF, 0xF8, 0x69, 0x08, 0x00, 0x00]);
    data
}

/// A 4x4 JPEG with a COM segment spliced after SOI.
pub fn jpeg(comment: &str) -> Vec<u8> {
    let pixels = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 120, 200]));
    let mut encoded = Vec::new();
    image::DynamicImage::ImageRgb8(pixels)
        .write_with_encoder(image::codecs::jpeg::JpegEncoder::new(&mut encoded))
        .unwrap();

    let mut data = vec![0xFF, 0xD8, 0xFF, 0xFE];
    data.extend_from_slice(&((comment.len() + 2) as u16).to_be_bytes());
    data.extend_from_slice(comment.as_bytes());
    data.extend_from_slice(&encoded[2..]);
    data
}

/// A 2x2 PNG with a `tEXt` chunk spliced after IHDR.
pub fn png(keyword: &str, text: &str) -> Vec<u8> {
    let pixels = image::RgbImage::from_pixel(2, 2, image::Rgb([0, 255, 0]));
    let mut encoded = Vec::new();
    image::DynamicImage::ImageRgb8(pixels)
        .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
        .unwrap();

    let mut payload = keyword.as_bytes().to_vec();
    payload.push(0);
    payload.extend_from_slice(text.as_bytes());
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(b"tEXt");
    hasher.update(&payload);

    // Signature (8) + IHDR (4 + 4 + 13 + 4).
    let split = 8 + 25;
    let mut data = encoded[..split].to_vec();
    data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    data.extend_from_slice(b"tEXt");
    data.extend_from_slice(&payload);
    data.extend_from_slice(&hasher.finalize().to_be_bytes());
    data.extend_from_slice(&encoded[split..]);
    data
}

// ---------------------------------------------------------------------------
// TAR
// ---------------------------------------------------------------------------

/// Appends an entry with a raw (unnormalized) name and owner fields.
pub fn tar_append(
    builder: &mut tar::Builder<Vec<u8>>,
    name: &[u8],
    entry_type: tar::EntryType,
    link: &[u8],
    mode: u32,
    data: &[u8],
) {
    let mut header = tar::Header::new_gnu();
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.as_old_mut().linkname[..link.len()].copy_from_slice(link);
    header.set_entry_type(entry_type);
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_mtime(1_528_000_000);
    header.set_uid(1000);
    header.set_gid(1000);
    header.set_username("jvoisin").unwrap();
    header.set_groupname("users").unwrap();
    header.set_cksum();
    builder.append(&header, data).unwrap();
}

/// Builds a TAR archive of regular files.
pub fn tar_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        tar_append(&mut builder, name.as_bytes(), tar::EntryType::Regular, b"", 0o644, data);
    }
    builder.into_inner().unwrap()
}

/// Gzip-compresses `data`.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
