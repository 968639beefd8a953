//! JPEG images.

use std::path::Path;

use super::{LeafFile, exif_metadata, leaf_paths};
use crate::cleaner::{Cleaner, HARMFUL_CONTENT, Metadata};
use crate::{Error, Result};

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const COM: u8 = 0xFE;
const APP0: u8 = 0xE0;
const APP15: u8 = 0xEF;

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const JFIF_HEADER: &[u8] = b"JFIF\0";

fn invalid(reason: impl Into<String>) -> Error {
    Error::invalid_data("JPEG", reason)
}

/// A marker segment before the first scan.
#[derive(Debug, Clone)]
struct Segment {
    marker: u8,
    payload: Vec<u8>,
}

impl Segment {
    fn is_app(&self) -> bool {
        (APP0..=APP15).contains(&self.marker)
    }

    fn is_jfif(&self) -> bool {
        self.marker == APP0 && self.payload.starts_with(JFIF_HEADER)
    }
}

/// Header segments plus everything from the first SOS on, kept opaque.
#[derive(Debug)]
struct Layout {
    segments: Vec<Segment>,
    scan: Vec<u8>,
}

fn parse(data: &[u8]) -> Result<Layout> {
    if data.get(..2) != Some(&[0xFF, SOI][..]) {
        return Err(invalid("missing SOI marker"));
    }
    let mut pos = 2;
    let mut segments = Vec::new();
    loop {
        if data.get(pos) != Some(&0xFF) {
            return Err(invalid(format!("expected a marker at offset {}", pos)));
        }
        // Fill bytes may precede a marker.
        while data.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        let marker = *data.get(pos + 1).ok_or_else(|| invalid("truncated marker"))?;
        match marker {
            EOI => return Err(invalid("no image data before EOI")),
            0xD0..=0xD7 | 0x01 => {
                pos += 2;
                continue;
            }
            _ => {}
        }
        let len = data
            .get(pos + 2..pos + 4)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .ok_or_else(|| invalid("truncated segment length"))?;
        if len < 2 {
            return Err(invalid("segment length below 2"));
        }
        if marker == SOS {
            if pos + 2 + len > data.len() {
                return Err(invalid("truncated scan header"));
            }
            return Ok(Layout {
                segments,
                scan: data[pos..].to_vec(),
            });
        }
        let payload = data
            .get(pos + 4..pos + 2 + len)
            .ok_or_else(|| invalid("truncated segment"))?;
        segments.push(Segment {
            marker,
            payload: payload.to_vec(),
        });
        pos += 2 + len;
    }
}

fn write(segments: &[&Segment], scan: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, SOI];
    for segment in segments {
        out.extend_from_slice(&[0xFF, segment.marker]);
        out.extend_from_slice(&((segment.payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&segment.payload);
    }
    out.extend_from_slice(scan);
    out
}

/// Cleaner for JPEG images.
#[derive(Debug)]
pub struct JpegCleaner {
    file: LeafFile,
    layout: Layout,
}

impl JpegCleaner {
    /// Parses the header segments.
    pub fn new(path: &Path) -> Result<Self> {
        let file = LeafFile::new(path);
        let layout = parse(&file.read()?)?;
        Ok(Self { file, layout })
    }

    fn lightweight_bytes(&self) -> Vec<u8> {
        let kept: Vec<&Segment> = self
            .layout
            .segments
            .iter()
            .filter(|s| s.marker != COM && (!s.is_app() || s.is_jfif()))
            .collect();
        write(&kept, &self.layout.scan)
    }
}

impl Cleaner for JpegCleaner {
    leaf_paths!();

    fn get_meta(&self) -> Result<Metadata> {
        let mut meta = Metadata::new();
        let mut comments = Vec::new();
        for segment in &self.layout.segments {
            if segment.marker == COM {
                comments.push(String::from_utf8_lossy(&segment.payload).into_owned());
                continue;
            }
            if !segment.is_app() || segment.is_jfif() {
                continue;
            }
            let payload = &segment.payload;
            if let Some(tiff) = payload.strip_prefix(EXIF_HEADER) {
                match exif_metadata(tiff.to_vec()) {
                    Ok(fields) => meta.extend(fields),
                    Err(e) => {
                        log::debug!("{}: undecodable EXIF: {}", self.file.path().display(), e);
                        meta.insert("Exif".into(), HARMFUL_CONTENT.into());
                    }
                }
            } else if let Some(xmp) = payload.strip_prefix(XMP_HEADER) {
                meta.insert("XMP".into(), String::from_utf8_lossy(xmp).into_owned().into());
            } else {
                let name = format!("APP{}", segment.marker - APP0);
                meta.insert(name, format!("{} bytes", payload.len()).into());
            }
        }
        if !comments.is_empty() {
            meta.insert("Comment".into(), comments.join(", ").into());
        }
        Ok(meta)
    }

    #[cfg(feature = "images")]
    fn remove_all(&mut self) -> Result<()> {
        use image::codecs::jpeg::JpegEncoder;

        let image = image::load_from_memory_with_format(&self.file.read()?, image::ImageFormat::Jpeg)
            .map_err(|e| invalid(e.to_string()))?;
        let pixels = image::DynamicImage::ImageRgb8(image.to_rgb8());
        let mut out = Vec::new();
        pixels
            .write_with_encoder(JpegEncoder::new_with_quality(&mut out, 90))
            .map_err(|e| invalid(e.to_string()))?;
        self.file.write_output(&out)
    }

    #[cfg(not(feature = "images"))]
    fn remove_all(&mut self) -> Result<()> {
        self.remove_all_lightweight()
    }

    fn remove_all_lightweight(&mut self) -> Result<()> {
        self.file.write_output(&self.lightweight_bytes())
    }
}
